//! Relational sink for `UsageRecord`s (spec §4.5 "Relational" and "Builtin embedded"
//! reporters share this trait). Grounded on `adi-family-cli/crates/llm-proxy/core`'s
//! sqlx-backed usage table, which is where this crate's `sqlx` dependency comes from —
//! the teacher repo has no equivalent relational usage sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::UsageRecord;

#[async_trait]
pub trait UsageStore: Send + Sync {
	async fn insert(&self, record: &UsageRecord) -> anyhow::Result<()>;
	/// Deletes rows older than `cutoff`. Only the builtin embedded reporter calls this,
	/// from an hourly sweeper (spec §4.5 "optionally capped by a retention window").
	async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
}

/// Postgres-backed store for the `relational` and `builtin` reporter variants.
pub struct SqlxUsageStore {
	pool: sqlx::PgPool,
	table: String,
}

impl SqlxUsageStore {
	pub fn new(pool: sqlx::PgPool, table: impl Into<String>) -> Self {
		SqlxUsageStore { pool, table: table.into() }
	}
}

#[async_trait]
impl UsageStore for SqlxUsageStore {
	async fn insert(&self, record: &UsageRecord) -> anyhow::Result<()> {
		let usage_json = record.usage.map(|u| serde_json::to_value(u)).transpose()?;
		let query = format!(
			"INSERT INTO {} (request_id, ts, user_id, api_key, request_body, usage, method, path, backend_url, status_code, latency_ms) \
			 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
			self.table
		);
		sqlx::query(&query)
			.bind(&record.request_id)
			.bind(record.timestamp)
			.bind(&record.user_id)
			.bind(&record.api_key)
			.bind(&record.request_body)
			.bind(usage_json)
			.bind(&record.method)
			.bind(&record.path)
			.bind(&record.backend_url)
			.bind(record.status_code as i32)
			.bind(record.latency_ms as i64)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
		let query = format!("DELETE FROM {} WHERE ts < $1", self.table);
		let result = sqlx::query(&query).bind(cutoff).execute(&self.pool).await?;
		Ok(result.rows_affected())
	}
}

/// In-memory store used by tests and by deployments with no `usage.reporters` of the
/// relational/builtin kind configured.
#[derive(Default)]
pub struct InMemoryUsageStore {
	records: parking_lot::Mutex<Vec<UsageRecord>>,
}

impl InMemoryUsageStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self) -> Vec<UsageRecord> {
		self.records.lock().clone()
	}
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
	async fn insert(&self, record: &UsageRecord) -> anyhow::Result<()> {
		self.records.lock().push(record.clone());
		Ok(())
	}

	async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
		let mut guard = self.records.lock();
		let before = guard.len();
		guard.retain(|r| r.timestamp >= cutoff);
		Ok((before - guard.len()) as u64)
	}
}
