pub mod log;
pub mod metrics;

pub use log::RequestLog;
pub use metrics::Metrics;
