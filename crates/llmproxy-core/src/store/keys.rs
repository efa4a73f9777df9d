//! `ApiKeyStore`: the seam the builtin auth provider and the admin CRUD surface both
//! use. Grounded on the teacher's `store::Stores` trait objects (dependency injected,
//! never a concrete DB handle threaded through the proxy core).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::ApiKey;

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
	async fn get(&self, key: &str) -> anyhow::Result<Option<ApiKey>>;
	async fn create(&self, key: ApiKey) -> anyhow::Result<()>;
	async fn update(&self, key: ApiKey) -> anyhow::Result<()>;
	async fn delete(&self, key: &str) -> anyhow::Result<()>;
	async fn list(&self) -> anyhow::Result<Vec<ApiKey>>;
	/// Atomically adds `tokens` to `used_quota` (spec §4.5 "atomically debits
	/// `used_quota`"). A no-op, not an error, if the key is unknown.
	async fn debit_quota(&self, key: &str, tokens: i64) -> anyhow::Result<()>;
}

/// Reference implementation used by the admin-managed "builtin" auth provider and in
/// tests. A relational-backed store (sqlx against Postgres) would implement the same
/// trait and slot in without touching the proxy core.
#[derive(Default)]
pub struct InMemoryApiKeyStore {
	keys: Mutex<HashMap<String, ApiKey>>,
}

impl InMemoryApiKeyStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
	async fn get(&self, key: &str) -> anyhow::Result<Option<ApiKey>> {
		Ok(self.keys.lock().get(key).cloned())
	}

	async fn create(&self, key: ApiKey) -> anyhow::Result<()> {
		self.keys.lock().insert(key.key.clone(), key);
		Ok(())
	}

	async fn update(&self, key: ApiKey) -> anyhow::Result<()> {
		self.keys.lock().insert(key.key.clone(), key);
		Ok(())
	}

	async fn delete(&self, key: &str) -> anyhow::Result<()> {
		self.keys.lock().remove(key);
		Ok(())
	}

	async fn list(&self) -> anyhow::Result<Vec<ApiKey>> {
		Ok(self.keys.lock().values().cloned().collect())
	}

	async fn debit_quota(&self, key: &str, tokens: i64) -> anyhow::Result<()> {
		if let Some(k) = self.keys.lock().get_mut(key) {
			k.used_quota += tokens;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{KeyStatus, QuotaResetPeriod};

	fn sample(key: &str) -> ApiKey {
		ApiKey {
			key: key.to_string(),
			user_id: "u1".to_string(),
			name: "test".to_string(),
			status: KeyStatus::Active,
			starts_at: None,
			expires_at: None,
			total_quota: 1000,
			used_quota: 0,
			quota_reset_period: QuotaResetPeriod::Never,
			last_reset_at: None,
			allowed_ips: vec![],
			denied_ips: vec![],
		}
	}

	#[tokio::test]
	async fn debit_accumulates() {
		let store = InMemoryApiKeyStore::new();
		store.create(sample("k1")).await.unwrap();
		store.debit_quota("k1", 30).await.unwrap();
		store.debit_quota("k1", 20).await.unwrap();
		let k = store.get("k1").await.unwrap().unwrap();
		assert_eq!(k.used_quota, 50);
	}

	#[tokio::test]
	async fn debit_unknown_key_is_noop() {
		let store = InMemoryApiKeyStore::new();
		store.debit_quota("missing", 10).await.unwrap();
		assert!(store.get("missing").await.unwrap().is_none());
	}
}
