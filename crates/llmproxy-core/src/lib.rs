//! Core logic for LLMProxy: a protocol-aware reverse proxy for OpenAI-compatible LLM
//! inference backends (spec §1). The binary crate (`llmproxy`) wires these modules to
//! an `axum` server, a loaded `Config`, and the external store/discovery
//! implementations; everything request-processing related lives here.

pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod proxy;
pub mod ratelimit;
pub mod router;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod usage;

pub use config::{parse_config, Config};
pub use error::{ProxyError, ProxyResult};
