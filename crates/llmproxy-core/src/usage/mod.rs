//! Usage extraction and reporter fan-out (spec §4.5). Orchestrates the pieces in
//! `extractor` and `reporter`: quota debit, Prometheus counters, then an independent
//! fan-out task per reporter, none of which block the request that triggered them.

pub mod extractor;
pub mod reporter;

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;

use crate::ratelimit::RateLimiter;
use crate::store::ApiKeyStore;
use crate::telemetry::Metrics;
use crate::types::{Usage, UsageRecord};

use reporter::Reporter;

pub struct UsageProcessor {
	reporters: Vec<Arc<dyn Reporter>>,
	key_store: Arc<dyn ApiKeyStore>,
	metrics: Arc<Metrics>,
	rate_limiter: Option<Arc<RateLimiter>>,
}

pub struct RawUsageInput {
	pub request_id: String,
	pub user_id: Option<String>,
	pub api_key: Option<String>,
	pub request_body: Bytes,
	pub method: String,
	pub path: String,
	pub backend_url: String,
	pub status_code: u16,
	pub latency_ms: u64,
	pub stream: bool,
	pub response_snapshot: Bytes,
}

impl UsageProcessor {
	pub fn new(reporters: Vec<Arc<dyn Reporter>>, key_store: Arc<dyn ApiKeyStore>, metrics: Arc<Metrics>, rate_limiter: Option<Arc<RateLimiter>>) -> Self {
		UsageProcessor { reporters, key_store, metrics, rate_limiter }
	}

	/// Builds the `UsageRecord` (spec §3/§6) and spawns the single post-processing
	/// task for this request (spec §4.5 "Concurrency: each request spawns exactly one
	/// reporter task"); that task fans out to every configured reporter concurrently
	/// without serializing them.
	pub fn process(self: &Arc<Self>, input: RawUsageInput) {
		let usage = if input.stream {
			extractor::extract_from_sse_tail(&input.response_snapshot)
		} else {
			extractor::extract_from_body(&input.response_snapshot)
		};

		let request_body: Option<Value> = serde_json::from_slice(&input.request_body).ok();

		let record = UsageRecord {
			request_id: input.request_id,
			timestamp: Utc::now(),
			user_id: input.user_id,
			api_key: input.api_key,
			request_body,
			usage,
			method: input.method,
			path: input.path,
			backend_url: input.backend_url,
			status_code: input.status_code,
			latency_ms: input.latency_ms,
		};

		if let Some(u) = usage {
			self.metrics.record_usage(u.prompt_tokens, u.completion_tokens);
		}
		self.metrics.record_request(&record.path, record.status_code, record.latency_ms as f64);

		let this = self.clone();
		tokio::spawn(async move { this.finish(record, usage).await });
	}

	async fn finish(&self, record: UsageRecord, usage: Option<Usage>) {
		if let (Some(key), Some(u)) = (&record.api_key, usage) {
			if u.total_tokens > 0 {
				if let Err(e) = self.key_store.debit_quota(key, u.total_tokens as i64).await {
					tracing::warn!(error = %e, "quota debit failed");
				}
				if let Some(limiter) = &self.rate_limiter {
					limiter.charge_tokens(key, u.total_tokens).await;
				}
			}
		}

		join_all(self.reporters.iter().map(|r| {
			let record = &record;
			async move { r.report(record).await }
		}))
		.await;
	}
}
