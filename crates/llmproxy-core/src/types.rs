//! Core data model (spec §3). Plain value types; behavior lives in the modules that
//! own each type's lifecycle (`router` for `Backend`/`BackendPool`, `store` for
//! `APIKey`, `auth` for `AuthProviderResult`/`AuthDecision`, `ratelimit` for
//! `TokenBucketState`, `usage` for `UsageRecord`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single upstream inference server. Created at config load or by a discovery
/// refresh; mutated only by the health checker and balancer accounting; destroyed on
/// pool reload.
#[derive(Debug, Clone, Serialize)]
pub struct Backend {
	pub name: String,
	pub url: url::Url,
	pub weight: u32,
	pub healthy: bool,
	/// EMA of request latency in milliseconds (spec §4.2, α = 0.3).
	pub latency_ms: f64,
	pub connections: u64,
	pub model_tags: Vec<String>,
	pub health_path: String,
	#[serde(skip)]
	pub consecutive_successes: u32,
	#[serde(skip)]
	pub consecutive_failures: u32,
	/// True once the backend has passed at least one health check. Prevents a cold
	/// node from being evicted on its very first failure (spec §4.2).
	#[serde(skip)]
	pub ever_passed: bool,
}

impl Backend {
	pub fn new(name: impl Into<String>, url: url::Url, weight: u32, health_path: impl Into<String>) -> Self {
		Backend {
			name: name.into(),
			url,
			weight: weight.max(1),
			healthy: true,
			latency_ms: 0.0,
			connections: 0,
			model_tags: Vec::new(),
			health_path: health_path.into(),
			consecutive_successes: 0,
			consecutive_failures: 0,
			ever_passed: false,
		}
	}

	/// Feed a completed-request latency sample into the EMA (spec §4.2).
	pub fn record_latency(&mut self, sample_ms: f64) {
		const ALPHA: f64 = 0.3;
		if self.latency_ms == 0.0 {
			self.latency_ms = sample_ms;
		} else {
			self.latency_ms = ALPHA * sample_ms + (1.0 - ALPHA) * self.latency_ms;
		}
	}
}

/// Ordered set of backends behind a monotonic version counter (spec §3). Reads
/// dominate; writes occur only on discovery refresh or health transitions. Modeled as
/// an arena+index rather than shared pointers, per spec §9 ("cyclic lifetimes"):
/// callers hold a `(version, index)` pair, never a long-lived reference into the pool.
#[derive(Debug, Default)]
pub struct BackendPool {
	pub backends: Vec<Backend>,
	version: AtomicU64,
}

impl BackendPool {
	pub fn new(backends: Vec<Backend>) -> Self {
		BackendPool {
			backends,
			version: AtomicU64::new(1),
		}
	}

	pub fn version(&self) -> u64 {
		self.version.load(Ordering::Acquire)
	}

	fn bump_version(&self) {
		self.version.fetch_add(1, Ordering::AcqRel);
	}

	pub fn healthy(&self) -> impl Iterator<Item = &Backend> {
		self.backends.iter().filter(|b| b.healthy)
	}

	pub fn mark_healthy(&mut self, name: &str, healthy: bool) {
		if let Some(b) = self.backends.iter_mut().find(|b| b.name == name) {
			if b.healthy != healthy {
				b.healthy = healthy;
				self.bump_version();
			}
		}
	}

	pub fn replace(&mut self, backends: Vec<Backend>) {
		self.backends = backends;
		self.bump_version();
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
	Active,
	Disabled,
	QuotaExceeded,
	Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResetPeriod {
	Daily,
	Weekly,
	Monthly,
	Never,
}

/// spec §3 `APIKey`. Invariants: `0 <= used_quota`; `used_quota` may transiently exceed
/// `total_quota` by at most one in-flight request's contribution (the debit happens
/// post-hoc in `usage::reporter`, after the request that pushed it over has already
/// been admitted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
	pub key: String,
	pub user_id: String,
	pub name: String,
	pub status: KeyStatus,
	pub starts_at: Option<DateTime<Utc>>,
	pub expires_at: Option<DateTime<Utc>>,
	pub total_quota: i64,
	pub used_quota: i64,
	pub quota_reset_period: QuotaResetPeriod,
	pub last_reset_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub allowed_ips: Vec<String>,
	#[serde(default)]
	pub denied_ips: Vec<String>,
}

/// spec §3 `AuthProviderResult`. Deliberately untyped past `found`/`error`: `data`
/// flows straight into the script sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthProviderResult {
	pub found: bool,
	#[serde(default)]
	pub data: HashMap<String, Value>,
	pub error: Option<String>,
}

/// spec §3 `AuthDecision`.
#[derive(Debug, Clone, Default)]
pub struct AuthDecision {
	pub allow: bool,
	pub message: Option<String>,
	pub metadata: HashMap<String, Value>,
}

/// spec §3 `TokenBucketState`, keyed externally by `(scope, subject, window)` in
/// `ratelimit::memory`.
#[derive(Debug, Clone)]
pub struct TokenBucketState {
	pub tokens: f64,
	pub last_refill_ns: i64,
	pub burst: f64,
	pub rate_per_sec: f64,
}

impl TokenBucketState {
	pub fn new(burst: f64, rate_per_sec: f64, now_ns: i64) -> Self {
		TokenBucketState {
			tokens: burst,
			last_refill_ns: now_ns,
			burst,
			rate_per_sec,
		}
	}

	/// Refill then attempt to admit `cost` tokens. Returns `(admitted, retry_after_ms)`.
	/// Invariant: on refusal the bucket is left untouched (spec §8 bucket monotonicity
	/// — admission strictly decreases tokens by `cost`, never by a partial amount).
	pub fn admit(&mut self, cost: f64, now_ns: i64) -> (bool, u64) {
		let dt_secs = ((now_ns - self.last_refill_ns).max(0) as f64) / 1_000_000_000.0;
		self.tokens = (self.tokens + dt_secs * self.rate_per_sec).min(self.burst);
		self.last_refill_ns = now_ns;
		if self.tokens >= cost {
			self.tokens -= cost;
			(true, 0)
		} else {
			let deficit = cost - self.tokens;
			let retry_after_ms = if self.rate_per_sec > 0.0 {
				((deficit / self.rate_per_sec) * 1000.0).ceil() as u64
			} else {
				u64::MAX
			};
			(false, retry_after_ms)
		}
	}

	/// Credit or debit tokens outside the normal admission path (used post-hoc by the
	/// token-per-minute bucket once true usage is known; spec §4.4).
	pub fn amend(&mut self, delta: f64) {
		self.tokens = (self.tokens - delta).clamp(0.0, self.burst);
	}
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
	pub total_tokens: u64,
}

/// spec §3 `UsageRecord`. Created after the response body is relayed; fanned out
/// read-only to every configured reporter.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
	pub request_id: String,
	pub timestamp: DateTime<Utc>,
	pub user_id: Option<String>,
	pub api_key: Option<String>,
	pub request_body: Option<Value>,
	pub usage: Option<Usage>,
	pub method: String,
	pub path: String,
	pub backend_url: String,
	pub status_code: u16,
	pub latency_ms: u64,
}

pub fn duration_ms(d: Duration) -> u64 {
	d.as_millis().min(u128::from(u64::MAX)) as u64
}
