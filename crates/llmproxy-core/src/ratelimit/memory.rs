//! In-memory token-bucket backend (spec §4.4 "a map keyed by bucket name with a mutex
//! per shard (16-64 shards by hash)"). Grounded on the teacher's `http::ratelimit`
//! sharded-map local limiter, generalized from a single global scope to the
//! multi-dimensional bucket keys this spec requires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::types::TokenBucketState;

const SHARD_COUNT: usize = 32;

struct Entry {
	bucket: Mutex<TokenBucketState>,
	last_touched: Mutex<Instant>,
}

/// Keyed by `(scope, subject, window)` flattened to a string, per spec §3
/// `TokenBucketState` and §4.4's bucket-key table.
#[derive(Clone, Default)]
pub struct MemoryBucketBackend {
	shards: Arc<[DashMap<String, Arc<Entry>>; SHARD_COUNT]>,
}

fn shard_index(key: &str) -> usize {
	use std::hash::{Hash, Hasher};
	let mut hasher = std::collections::hash_map::DefaultHasher::new();
	key.hash(&mut hasher);
	(hasher.finish() as usize) % SHARD_COUNT
}

fn now_ns() -> i64 {
	// Wall-clock nanoseconds since UNIX_EPOCH; used only for the refill math inside
	// `TokenBucketState`, which only ever looks at deltas.
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_nanos() as i64)
		.unwrap_or(0)
}

impl MemoryBucketBackend {
	pub fn new() -> Self {
		MemoryBucketBackend {
			shards: Arc::new(std::array::from_fn(|_| DashMap::new())),
		}
	}

	/// Admits `cost` tokens from the bucket named `key`, creating it with the given
	/// `burst`/`rate_per_sec` budget on first use. Returns `(admitted, retry_after_ms)`.
	pub fn admit(&self, key: &str, cost: f64, burst: f64, rate_per_sec: f64) -> (bool, u64) {
		let shard = &self.shards[shard_index(key)];
		let entry = shard
			.entry(key.to_string())
			.or_insert_with(|| {
				Arc::new(Entry {
					bucket: Mutex::new(TokenBucketState::new(burst, rate_per_sec, now_ns())),
					last_touched: Mutex::new(Instant::now()),
				})
			})
			.clone();
		*entry.last_touched.lock() = Instant::now();
		entry.bucket.lock().admit(cost, now_ns())
	}

	/// Post-hoc credit/debit outside the normal admission path (spec §4.4 token-rate
	/// bucket charged after usage extraction).
	pub fn amend(&self, key: &str, delta: f64, burst: f64, rate_per_sec: f64) {
		let shard = &self.shards[shard_index(key)];
		let entry = shard
			.entry(key.to_string())
			.or_insert_with(|| {
				Arc::new(Entry {
					bucket: Mutex::new(TokenBucketState::new(burst, rate_per_sec, now_ns())),
					last_touched: Mutex::new(Instant::now()),
				})
			})
			.clone();
		entry.bucket.lock().amend(delta);
	}

	/// Drops bucket entries idle for longer than `idle` (spec §4.4 "A janitor task
	/// evicts idle entries after 10 minutes").
	pub fn evict_idle(&self, idle: Duration) {
		let cutoff = Instant::now() - idle;
		for shard in self.shards.iter() {
			shard.retain(|_, entry| *entry.last_touched.lock() > cutoff);
		}
	}

	pub fn spawn_janitor(self: Arc<Self>, interval: Duration, shutdown: tokio_util::sync::CancellationToken) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			loop {
				tokio::select! {
					_ = shutdown.cancelled() => return,
					_ = ticker.tick() => self.evict_idle(interval),
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn admits_up_to_burst_then_rejects() {
		let backend = MemoryBucketBackend::new();
		assert!(backend.admit("k", 1.0, 2.0, 0.0).0);
		assert!(backend.admit("k", 1.0, 2.0, 0.0).0);
		assert!(!backend.admit("k", 1.0, 2.0, 0.0).0);
	}

	#[test]
	fn separate_keys_have_independent_buckets() {
		let backend = MemoryBucketBackend::new();
		assert!(backend.admit("a", 1.0, 1.0, 0.0).0);
		assert!(backend.admit("b", 1.0, 1.0, 0.0).0);
	}
}
