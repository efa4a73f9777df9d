//! Configuration surface (spec §6). YAML is the source of truth; a handful of secrets
//! may be overridden by environment variables, following the env-overlay helper from
//! `adi-family-cli/crates/llm-proxy/core/src/config.rs` layered on top of the teacher's
//! raw-then-defaulted `parse_config` shape.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

fn env_override(name: &str) -> Option<String> {
	env::var(name).ok().filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
	#[serde(default = "default_listen")]
	pub listen: String,
	#[serde(default = "default_max_body_bytes")]
	pub max_body_bytes: usize,
	#[serde(default = "default_connect_timeout_secs")]
	pub connect_timeout_secs: u64,
	#[serde(default = "default_read_timeout_secs")]
	pub read_timeout_secs: u64,
	#[serde(default = "default_idle_timeout_secs")]
	pub idle_timeout_secs: u64,
	#[serde(default = "default_shutdown_grace_secs")]
	pub shutdown_grace_secs: u64,
	#[serde(default = "default_max_idle_per_host")]
	pub max_idle_conns_per_host: usize,
}

fn default_listen() -> String {
	"0.0.0.0:8080".to_string()
}
fn default_max_body_bytes() -> usize {
	10 * 1024 * 1024
}
fn default_connect_timeout_secs() -> u64 {
	5
}
fn default_read_timeout_secs() -> u64 {
	30
}
fn default_idle_timeout_secs() -> u64 {
	120
}
fn default_shutdown_grace_secs() -> u64 {
	10
}
fn default_max_idle_per_host() -> usize {
	10
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
	pub name: String,
	pub url: String,
	#[serde(default = "default_weight")]
	pub weight: u32,
	#[serde(default = "default_health_path")]
	pub health_path: String,
	#[serde(default)]
	pub model_tags: Vec<String>,
}

fn default_weight() -> u32 {
	1
}
fn default_health_path() -> String {
	"/health".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
	RoundRobin,
	LeastConnections,
	LatencyBased,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryFailureKind {
	ConnectFailure,
	Timeout,
	#[serde(rename = "5xx")]
	ServerError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_initial_wait_ms")]
	pub initial_wait_ms: u64,
	#[serde(default = "default_max_wait_ms")]
	pub max_wait_ms: u64,
	#[serde(default = "default_multiplier")]
	pub multiplier: f64,
	#[serde(default = "default_retry_on")]
	pub retry_on: Vec<RetryFailureKind>,
}

fn default_max_retries() -> u32 {
	2
}
fn default_initial_wait_ms() -> u64 {
	100
}
fn default_max_wait_ms() -> u64 {
	2000
}
fn default_multiplier() -> f64 {
	2.0
}
fn default_retry_on() -> Vec<RetryFailureKind> {
	vec![RetryFailureKind::ConnectFailure, RetryFailureKind::Timeout]
}

impl Default for RetryConfig {
	fn default() -> Self {
		RetryConfig {
			enabled: false,
			max_retries: default_max_retries(),
			initial_wait_ms: default_initial_wait_ms(),
			max_wait_ms: default_max_wait_ms(),
			multiplier: default_multiplier(),
			retry_on: default_retry_on(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackRule {
	pub primary: String,
	pub fallback: Vec<String>,
	#[serde(default)]
	pub model_tag: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
	#[serde(default = "default_health_interval_secs")]
	pub interval_secs: u64,
	#[serde(default = "default_health_timeout_secs")]
	pub timeout_secs: u64,
	#[serde(default = "default_healthy_threshold")]
	pub healthy_threshold: u32,
	#[serde(default = "default_unhealthy_threshold")]
	pub unhealthy_threshold: u32,
}

fn default_health_interval_secs() -> u64 {
	10
}
fn default_health_timeout_secs() -> u64 {
	5
}
fn default_healthy_threshold() -> u32 {
	2
}
fn default_unhealthy_threshold() -> u32 {
	3
}

impl Default for HealthCheckConfig {
	fn default() -> Self {
		HealthCheckConfig {
			interval_secs: default_health_interval_secs(),
			timeout_secs: default_health_timeout_secs(),
			healthy_threshold: default_healthy_threshold(),
			unhealthy_threshold: default_unhealthy_threshold(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
	#[serde(default = "default_strategy")]
	pub strategy: BalancingStrategy,
	#[serde(default)]
	pub retry: RetryConfig,
	#[serde(default)]
	pub fallback: Vec<FallbackRule>,
	/// Header carrying the model-name tag fallback rules are gated by. The request body
	/// stays opaque past the `stream` field, so this never parses it.
	#[serde(default = "default_model_tag_header")]
	pub model_tag_header: String,
}

fn default_strategy() -> BalancingStrategy {
	BalancingStrategy::RoundRobin
}

fn default_model_tag_header() -> String {
	"x-model-tag".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
	Builtin,
	ExternalKv {
		key_pattern: String,
	},
	Table {
		table: String,
		columns: Vec<String>,
	},
	Static {
		keys: HashMap<String, serde_json::Value>,
	},
	Webhook {
		url: String,
		#[serde(default = "default_webhook_timeout_ms")]
		timeout_ms: u64,
	},
}

fn default_webhook_timeout_ms() -> u64 {
	3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthProviderEntry {
	pub name: String,
	#[serde(flatten)]
	pub provider: ProviderConfig,
	#[serde(default)]
	pub script: Option<String>,
	#[serde(default)]
	pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
	FirstMatch,
	All,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DenyMessage {
	pub message: String,
	pub code: u16,
}

/// The default rule's deny reasons, keyed by an internal reason tag (spec §4.3: deny
/// "with the corresponding configured message and HTTP code" — §8 Scenario C expects an
/// operator-supplied message, not a fixed English string).
#[derive(Debug, Clone, Deserialize)]
pub struct DenyMessages {
	#[serde(default = "default_account_disabled")]
	pub account_disabled: DenyMessage,
	#[serde(default = "default_key_expired")]
	pub key_expired: DenyMessage,
	#[serde(default = "default_quota_exceeded")]
	pub quota_exceeded: DenyMessage,
	#[serde(default = "default_insufficient_balance")]
	pub insufficient_balance: DenyMessage,
}

impl Default for DenyMessages {
	fn default() -> Self {
		DenyMessages {
			account_disabled: default_account_disabled(),
			key_expired: default_key_expired(),
			quota_exceeded: default_quota_exceeded(),
			insufficient_balance: default_insufficient_balance(),
		}
	}
}

fn default_account_disabled() -> DenyMessage {
	DenyMessage { message: "account_disabled".to_string(), code: 403 }
}
fn default_key_expired() -> DenyMessage {
	DenyMessage { message: "key_expired".to_string(), code: 403 }
}
fn default_quota_exceeded() -> DenyMessage {
	DenyMessage { message: "quota_exceeded".to_string(), code: 429 }
}
fn default_insufficient_balance() -> DenyMessage {
	DenyMessage { message: "insufficient_balance".to_string(), code: 402 }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
	#[serde(default = "default_auth_headers")]
	pub headers: Vec<String>,
	#[serde(default)]
	pub skip_paths: Vec<String>,
	#[serde(default = "default_auth_mode")]
	pub mode: AuthMode,
	#[serde(default)]
	pub providers: Vec<AuthProviderEntry>,
	#[serde(default = "default_script_timeout_ms")]
	pub script_timeout_ms: u64,
	#[serde(default = "default_script_memory_bytes")]
	pub script_memory_bytes: usize,
	#[serde(default)]
	pub deny_messages: DenyMessages,
}

fn default_auth_headers() -> Vec<String> {
	vec!["Authorization".to_string(), "X-API-Key".to_string()]
}
fn default_auth_mode() -> AuthMode {
	AuthMode::FirstMatch
}
fn default_script_timeout_ms() -> u64 {
	1000
}
fn default_script_memory_bytes() -> usize {
	10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default)]
	pub global_rps: Option<f64>,
	#[serde(default)]
	pub global_rpm: Option<f64>,
	#[serde(default)]
	pub per_key_rps: Option<f64>,
	#[serde(default)]
	pub per_key_rpm: Option<f64>,
	#[serde(default)]
	pub per_key_tpm: Option<f64>,
	#[serde(default)]
	pub max_concurrent: Option<u32>,
	#[serde(default = "default_backend_kind")]
	pub backend: RateLimitBackendKind,
	#[serde(default = "default_janitor_idle_secs")]
	pub janitor_idle_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackendKind {
	Memory,
	Shared,
}

fn default_backend_kind() -> RateLimitBackendKind {
	RateLimitBackendKind::Memory
}
fn default_janitor_idle_secs() -> u64 {
	600
}

impl Default for RateLimitConfig {
	fn default() -> Self {
		RateLimitConfig {
			enabled: false,
			global_rps: None,
			global_rpm: None,
			per_key_rps: None,
			per_key_rpm: None,
			per_key_tpm: None,
			max_concurrent: None,
			backend: default_backend_kind(),
			janitor_idle_secs: default_janitor_idle_secs(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReporterConfig {
	Webhook {
		url: String,
		#[serde(default = "default_reporter_retries")]
		retries: u32,
		#[serde(default = "default_webhook_timeout_ms")]
		timeout_ms: u64,
	},
	Relational {
		table: String,
	},
	Builtin {
		#[serde(default)]
		retention_days: Option<u32>,
	},
}

fn default_reporter_retries() -> u32 {
	3
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageConfig {
	#[serde(default)]
	pub reporters: Vec<ReporterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
	#[serde(default)]
	pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
	#[serde(default = "default_discovery_interval_secs")]
	pub refresh_interval_secs: u64,
	#[serde(flatten)]
	pub source: DiscoverySourceConfig,
}

fn default_discovery_interval_secs() -> u64 {
	30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DiscoverySourceConfig {
	Consul { address: String, service: String },
	Kubernetes { namespace: String, service: String },
	Etcd { endpoints: Vec<String>, prefix: String },
	Http { url: String },
}

/// All-`Option`/defaultable intermediate form, deserialized first so a partially
/// specified document never fails before we get a chance to apply defaults — mirrors
/// the teacher's `NestedRawConfig`/`RawConfig` two-stage parse.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
	pub server: Option<ServerConfig>,
	#[serde(default)]
	pub backends: Vec<BackendConfig>,
	pub routing: Option<RoutingConfig>,
	pub auth: Option<AuthConfig>,
	pub rate_limit: Option<RateLimitConfig>,
	pub health_check: Option<HealthCheckConfig>,
	pub usage: Option<UsageConfig>,
	pub discovery: Option<DiscoveryConfig>,
	pub admin: Option<AdminConfig>,
}

#[derive(Debug, Clone)]
pub struct Config {
	pub server: ServerConfig,
	pub backends: Vec<BackendConfig>,
	pub routing: RoutingConfig,
	pub auth: AuthConfig,
	pub rate_limit: RateLimitConfig,
	pub health_check: HealthCheckConfig,
	pub usage: UsageConfig,
	pub discovery: Option<DiscoveryConfig>,
	pub admin: AdminConfig,
}

impl Config {
	pub fn connect_timeout(&self) -> Duration {
		Duration::from_secs(self.server.connect_timeout_secs)
	}
	pub fn read_timeout(&self) -> Duration {
		Duration::from_secs(self.server.read_timeout_secs)
	}
}

/// Parse and default a YAML document into a `Config` (spec §6). Environment variables
/// `LLMPROXY_ADMIN_TOKEN` override `admin.token` so the token need not live in the YAML
/// file committed to source control.
pub fn parse_config(contents: &str) -> Result<Config> {
	let raw: RawConfig = serde_yaml::from_str(contents).context("failed to parse YAML config")?;

	let server = raw.server.unwrap_or_else(|| ServerConfig {
		listen: default_listen(),
		max_body_bytes: default_max_body_bytes(),
		connect_timeout_secs: default_connect_timeout_secs(),
		read_timeout_secs: default_read_timeout_secs(),
		idle_timeout_secs: default_idle_timeout_secs(),
		shutdown_grace_secs: default_shutdown_grace_secs(),
		max_idle_conns_per_host: default_max_idle_per_host(),
	});

	if raw.backends.is_empty() {
		anyhow::bail!("at least one backend must be configured");
	}

	let routing = raw.routing.unwrap_or(RoutingConfig {
		strategy: default_strategy(),
		retry: RetryConfig::default(),
		fallback: Vec::new(),
		model_tag_header: default_model_tag_header(),
	});

	let auth = raw.auth.unwrap_or(AuthConfig {
		headers: default_auth_headers(),
		skip_paths: Vec::new(),
		mode: default_auth_mode(),
		providers: Vec::new(),
		script_timeout_ms: default_script_timeout_ms(),
		script_memory_bytes: default_script_memory_bytes(),
		deny_messages: DenyMessages::default(),
	});

	let rate_limit = raw.rate_limit.unwrap_or_default();
	let health_check = raw.health_check.unwrap_or_default();
	let usage = raw.usage.unwrap_or_default();

	let mut admin = raw.admin.unwrap_or(AdminConfig { token: String::new() });
	if let Some(tok) = env_override("LLMPROXY_ADMIN_TOKEN") {
		admin.token = tok;
	}

	Ok(Config {
		server,
		backends: raw.backends,
		routing,
		auth,
		rate_limit,
		health_check,
		usage,
		discovery: raw.discovery,
		admin,
	})
}
