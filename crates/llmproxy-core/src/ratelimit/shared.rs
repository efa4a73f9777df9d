//! The `shared` rate-limit backend and the external KV interface reused by the
//! `external_kv` auth provider (spec §4.4 "Shared: atomic check-and-decrement
//! implemented as a single round-trip script on the external KV"). The concrete KV
//! (Redis, etc.) is out of scope (spec §1); only the trait contract lives here.

use async_trait::async_trait;

#[async_trait]
pub trait SharedKv: Send + Sync {
	async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
	async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
	/// Runs the refill+debit script atomically against `key`, returning
	/// `(admitted, tokens_remaining)` (spec §4.4). A single round trip avoids races
	/// across replicas sharing the same KV.
	async fn admit(&self, key: &str, cost: f64, burst: f64, rate_per_sec: f64, now_ns: i64) -> anyhow::Result<(bool, f64)>;
}

/// In-process stand-in implementing the same script semantics locally, for
/// deployments and tests that configure `rate_limit.backend: shared` without wiring a
/// real external KV.
#[derive(Default)]
pub struct LocalSharedKv {
	strings: parking_lot::Mutex<std::collections::HashMap<String, String>>,
	buckets: parking_lot::Mutex<std::collections::HashMap<String, crate::types::TokenBucketState>>,
}

impl LocalSharedKv {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl SharedKv for LocalSharedKv {
	async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
		Ok(self.strings.lock().get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
		self.strings.lock().insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn admit(&self, key: &str, cost: f64, burst: f64, rate_per_sec: f64, now_ns: i64) -> anyhow::Result<(bool, f64)> {
		let mut guard = self.buckets.lock();
		let state = guard
			.entry(key.to_string())
			.or_insert_with(|| crate::types::TokenBucketState::new(burst, rate_per_sec, now_ns));
		let (admitted, _retry_after_ms) = state.admit(cost, now_ns);
		Ok((admitted, state.tokens))
	}
}
