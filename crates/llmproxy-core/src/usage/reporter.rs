//! Reporter fan-out (spec §4.5 "Fan-out"). Grounded on the teacher's `telemetry`
//! webhook-style exporters for the HTTP variant; the relational/builtin variants are
//! grounded on `adi-family-cli/crates/llm-proxy/core`'s sqlx usage sink, since the
//! teacher carries no relational usage store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::warn;

use crate::config::ReporterConfig;
use crate::store::UsageStore;
use crate::types::UsageRecord;

#[async_trait]
pub trait Reporter: Send + Sync {
	fn name(&self) -> &str;
	async fn report(&self, record: &UsageRecord);
}

/// POSTs the JSON record; retries up to `retries` times with `100ms * attempt`
/// backoff and a per-attempt timeout; success is any 2xx (spec §4.5 "HTTP webhook").
pub struct WebhookReporter {
	url: String,
	retries: u32,
	timeout: Duration,
	client: reqwest::Client,
}

impl WebhookReporter {
	pub fn new(url: String, retries: u32, timeout_ms: u64, client: reqwest::Client) -> Self {
		WebhookReporter { url, retries, timeout: Duration::from_millis(timeout_ms), client }
	}
}

#[async_trait]
impl Reporter for WebhookReporter {
	fn name(&self) -> &str {
		"webhook"
	}

	async fn report(&self, record: &UsageRecord) {
		for attempt in 1..=self.retries.max(1) {
			let sent = tokio::time::timeout(self.timeout, self.client.post(&self.url).json(record).send()).await;
			match sent {
				Ok(Ok(resp)) if resp.status().is_success() => return,
				Ok(Ok(resp)) => warn!(url = %self.url, status = %resp.status(), attempt, "usage webhook returned non-2xx"),
				Ok(Err(e)) => warn!(url = %self.url, error = %e, attempt, "usage webhook request failed"),
				Err(_) => warn!(url = %self.url, attempt, "usage webhook timed out"),
			}
			tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
		}
	}
}

/// Single `INSERT` into a configured relational table (spec §4.5 "Relational").
pub struct RelationalReporter {
	store: Arc<dyn UsageStore>,
}

impl RelationalReporter {
	pub fn new(store: Arc<dyn UsageStore>) -> Self {
		RelationalReporter { store }
	}
}

#[async_trait]
impl Reporter for RelationalReporter {
	fn name(&self) -> &str {
		"relational"
	}

	async fn report(&self, record: &UsageRecord) {
		if let Err(e) = self.store.insert(record).await {
			warn!(error = %e, "relational usage insert failed");
		}
	}
}

/// Writes to a local embedded table; an hourly sweeper deletes rows older than
/// `retention_days` (spec §4.5 "Builtin embedded").
pub struct BuiltinReporter {
	store: Arc<dyn UsageStore>,
	retention_days: Option<u32>,
}

impl BuiltinReporter {
	pub fn new(store: Arc<dyn UsageStore>, retention_days: Option<u32>) -> Self {
		BuiltinReporter { store, retention_days }
	}

	pub fn spawn_retention_sweeper(self: Arc<Self>, shutdown: tokio_util::sync::CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
		let retention_days = self.retention_days?;
		Some(tokio::spawn(async move {
			let mut ticker = tokio::time::interval(Duration::from_secs(3600));
			loop {
				tokio::select! {
					_ = shutdown.cancelled() => return,
					_ = ticker.tick() => {
						let cutoff = Utc::now() - ChronoDuration::days(retention_days as i64);
						if let Err(e) = self.store.delete_older_than(cutoff).await {
							warn!(error = %e, "usage retention sweep failed");
						}
					}
				}
			}
		}))
	}
}

#[async_trait]
impl Reporter for BuiltinReporter {
	fn name(&self) -> &str {
		"builtin"
	}

	async fn report(&self, record: &UsageRecord) {
		if let Err(e) = self.store.insert(record).await {
			warn!(error = %e, "builtin usage insert failed");
		}
	}
}

pub fn build_reporters(configs: &[ReporterConfig], client: reqwest::Client, usage_store: Arc<dyn UsageStore>) -> Vec<Arc<dyn Reporter>> {
	configs
		.iter()
		.map(|cfg| -> Arc<dyn Reporter> {
			match cfg {
				ReporterConfig::Webhook { url, retries, timeout_ms } => {
					Arc::new(WebhookReporter::new(url.clone(), *retries, *timeout_ms, client.clone()))
				}
				ReporterConfig::Relational { .. } => Arc::new(RelationalReporter::new(usage_store.clone())),
				ReporterConfig::Builtin { retention_days } => Arc::new(BuiltinReporter::new(usage_store.clone(), *retention_days)),
			}
		})
		.collect()
}
