//! Prometheus metrics (spec §4.5, §6 `/metrics`). Grounded on the teacher's
//! `telemetry::metrics::Metrics` — a `Registry` plus a handful of `Family`-wrapped
//! counters/histograms registered once at startup.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum TokenType {
	Prompt,
	Completion,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
	pub path: String,
	pub status: u16,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TokenLabels {
	pub r#type: TokenType,
}

pub struct Metrics {
	pub requests_total: Family<RequestLabels, Counter>,
	pub latency_ms: Histogram,
	pub usage_tokens_total: Family<TokenLabels, Counter>,
	pub retries_total: Counter,
	pub rate_limited_total: Counter,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let requests_total = Family::default();
		registry.register(
			"requests_total",
			"Total number of proxied requests",
			requests_total.clone(),
		);

		let latency_ms = Histogram::new(exponential_buckets(5.0, 2.0, 14));
		registry.register(
			"latency_ms",
			"End-to-end request latency in milliseconds",
			latency_ms.clone(),
		);

		let usage_tokens_total = Family::default();
		registry.register(
			"usage_tokens_total",
			"Total tokens reported by backends",
			usage_tokens_total.clone(),
		);

		let retries_total = Counter::default();
		registry.register("retries_total", "Total retry attempts", retries_total.clone());

		let rate_limited_total = Counter::default();
		registry.register(
			"rate_limited_total",
			"Total requests rejected by the rate limiter",
			rate_limited_total.clone(),
		);

		Metrics {
			requests_total,
			latency_ms,
			usage_tokens_total,
			retries_total,
			rate_limited_total,
		}
	}

	pub fn record_request(&self, path: &str, status: u16, latency_ms: f64) {
		self
			.requests_total
			.get_or_create(&RequestLabels {
				path: path.to_string(),
				status,
			})
			.inc();
		self.latency_ms.observe(latency_ms);
	}

	pub fn record_usage(&self, prompt_tokens: u64, completion_tokens: u64) {
		self
			.usage_tokens_total
			.get_or_create(&TokenLabels {
				r#type: TokenType::Prompt,
			})
			.inc_by(prompt_tokens);
		self
			.usage_tokens_total
			.get_or_create(&TokenLabels {
				r#type: TokenType::Completion,
			})
			.inc_by(completion_tokens);
	}
}
