//! `BackendPool` wrapped for concurrent read-mostly access (spec §3, §5: "The
//! BackendPool is read-mostly"). Grounded on the teacher's `store::Stores` /
//! `StoreUpdater` pattern — a `parking_lot::RwLock` guarding the pool, with writes
//! confined to health transitions and discovery refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{Backend, BackendPool};

#[derive(Clone)]
pub struct SharedPool {
	inner: Arc<RwLock<BackendPool>>,
	rr_cursor: Arc<AtomicU64>,
}

impl SharedPool {
	pub fn new(backends: Vec<Backend>) -> Self {
		SharedPool {
			inner: Arc::new(RwLock::new(BackendPool::new(backends))),
			rr_cursor: Arc::new(AtomicU64::new(0)),
		}
	}

	pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, BackendPool> {
		self.inner.read()
	}

	pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, BackendPool> {
		self.inner.write()
	}

	pub fn version(&self) -> u64 {
		self.inner.read().version()
	}

	/// Atomically advances and returns a round-robin cursor value, shared across all
	/// callers selecting against this pool.
	pub fn next_rr(&self) -> u64 {
		self.rr_cursor.fetch_add(1, Ordering::Relaxed)
	}

	pub fn find_by_name(&self, name: &str) -> Option<Backend> {
		self.inner.read().backends.iter().find(|b| b.name == name).cloned()
	}
}
