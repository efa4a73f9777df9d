//! Retry/backoff policy (spec §4.2). Grounded on the teacher's `http::retry::Policy`
//! (attempts + backoff + retryable status codes) and the attempt loop in
//! `proxy::httpproxy::HTTPProxy::proxy_internal`. Unlike the teacher, this proxy
//! captures the full request body into memory before dispatch (spec §4.1), so a retry
//! simply resends the same `Bytes` — there is no need for the teacher's streaming
//! `ReplayBody` tee-and-rewind adapter.

use std::time::Duration;

use crate::config::{RetryConfig, RetryFailureKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOn {
	pub connect_failure: bool,
	pub timeout: bool,
	pub server_error: bool,
}

impl From<&[RetryFailureKind]> for RetryOn {
	fn from(kinds: &[RetryFailureKind]) -> Self {
		let mut r = RetryOn::default();
		for k in kinds {
			match k {
				RetryFailureKind::ConnectFailure => r.connect_failure = true,
				RetryFailureKind::Timeout => r.timeout = true,
				RetryFailureKind::ServerError => r.server_error = true,
			}
		}
		r
	}
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
	pub enabled: bool,
	pub max_retries: u32,
	pub initial_wait: Duration,
	pub max_wait: Duration,
	pub multiplier: f64,
	pub retry_on: RetryOn,
}

impl From<&RetryConfig> for RetryPolicy {
	fn from(cfg: &RetryConfig) -> Self {
		RetryPolicy {
			enabled: cfg.enabled,
			max_retries: cfg.max_retries,
			initial_wait: Duration::from_millis(cfg.initial_wait_ms),
			max_wait: Duration::from_millis(cfg.max_wait_ms),
			multiplier: cfg.multiplier,
			retry_on: RetryOn::from(cfg.retry_on.as_slice()),
		}
	}
}

impl RetryPolicy {
	/// `wait = min(initial_wait * multiplier^attempt, max_wait)` (spec §4.2).
	pub fn backoff(&self, attempt: u32) -> Duration {
		let scaled = self.initial_wait.as_secs_f64() * self.multiplier.powi(attempt as i32);
		let capped = scaled.min(self.max_wait.as_secs_f64());
		Duration::from_secs_f64(capped.max(0.0))
	}
}

/// A request is retry-eligible iff the failure kind is in `retry_on` *and* no bytes
/// have yet reached the client (spec §4.2, §7, §8 "retry safety"). The second half of
/// that invariant is enforced by the caller never invoking this after the first flush.
pub fn is_retry_eligible(err: &crate::error::ProxyError, policy: &RetryPolicy) -> bool {
	policy.enabled && err.is_retryable(&policy.retry_on)
}
