//! Multi-dimensional token-bucket rate limiter (spec §4.4). Grounded on the teacher's
//! `http::ratelimit` module (sharded local limiter + pluggable remote backend), with
//! the bucket math itself living in `types::TokenBucketState`.

pub mod memory;
pub mod shared;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::RateLimitConfig;
use crate::error::ProxyError;
use crate::telemetry::Metrics;

pub use shared::SharedKv;

const GLOBAL_SCOPE: &str = "_global";

enum Backend {
	Memory(memory::MemoryBucketBackend),
	Shared(Arc<dyn SharedKv>),
}

/// Held for the lifetime of one admitted request; releasing it (drop) frees the
/// concurrency slot (spec §4.4 "if the client disconnects while holding a concurrency
/// semaphore slot, the slot is released on context cancel" — dropping on any exit
/// path, including cancellation, satisfies this).
pub struct ConcurrencyGuard(#[allow(dead_code)] Option<OwnedSemaphorePermit>);

pub struct RateLimiter {
	enabled: bool,
	cfg: RateLimitConfig,
	backend: Backend,
	concurrency: DashMap<String, Arc<Semaphore>>,
	metrics: Option<Arc<Metrics>>,
}

impl RateLimiter {
	pub fn new(cfg: RateLimitConfig, shared_kv: Option<Arc<dyn SharedKv>>) -> Self {
		Self::with_metrics(cfg, shared_kv, None)
	}

	pub fn with_metrics(cfg: RateLimitConfig, shared_kv: Option<Arc<dyn SharedKv>>, metrics: Option<Arc<Metrics>>) -> Self {
		let backend = match (cfg.backend, shared_kv) {
			(crate::config::RateLimitBackendKind::Shared, Some(kv)) => Backend::Shared(kv),
			_ => Backend::Memory(memory::MemoryBucketBackend::new()),
		};
		RateLimiter {
			enabled: cfg.enabled,
			cfg,
			backend,
			concurrency: DashMap::new(),
			metrics,
		}
	}

	pub fn spawn_janitor(&self, shutdown: tokio_util::sync::CancellationToken) {
		if let Backend::Memory(mem) = &self.backend {
			Arc::new(mem.clone()).spawn_janitor(std::time::Duration::from_secs(self.cfg.janitor_idle_secs), shutdown);
		}
	}

	/// Checks the global and per-key request-rate buckets (spec §4.4 "checked before
	/// dispatch"). Returns `Err(RateLimited)` with a retry-after hint on rejection.
	pub async fn admit_request(&self, api_key: &str) -> Result<(), ProxyError> {
		if !self.enabled {
			return Ok(());
		}
		if let Some(rps) = self.cfg.global_rps {
			self.check_bucket(GLOBAL_SCOPE, "rps", 1.0, rps, rps.max(1.0)).await?;
		}
		if let Some(rpm) = self.cfg.global_rpm {
			self.check_bucket(GLOBAL_SCOPE, "rpm", 1.0, rpm / 60.0, rpm).await?;
		}
		if let Some(rps) = self.cfg.per_key_rps {
			self.check_bucket(api_key, "rps", 1.0, rps, rps.max(1.0)).await?;
		}
		if let Some(rpm) = self.cfg.per_key_rpm {
			self.check_bucket(api_key, "rpm", 1.0, rpm / 60.0, rpm).await?;
		}
		if let Some(tpm) = self.cfg.per_key_tpm {
			// The real token cost of a request is unknown before dispatch (it is only
			// known once usage is extracted), so admission probes the bucket with a
			// minimal cost: once `charge_tokens` has driven it to empty, this denies
			// the *next* request rather than the one that caused the overage.
			self.check_bucket(api_key, "tpm", 1.0, tpm / 60.0, tpm).await?;
		}
		Ok(())
	}

	/// Post-hoc charge against the per-key tokens/minute bucket (spec §4.4: "charged
	/// after usage extraction... if the user exceeds TPM, the *next* request is
	/// denied, not the current one").
	pub async fn charge_tokens(&self, api_key: &str, total_tokens: u64) {
		let Some(tpm) = self.cfg.per_key_tpm else { return };
		if total_tokens == 0 {
			return;
		}
		let key = bucket_key(api_key, "tpm");
		match &self.backend {
			Backend::Memory(mem) => mem.amend(&key, total_tokens as f64, tpm, tpm / 60.0),
			Backend::Shared(kv) => {
				let _ = kv.admit(&key, total_tokens as f64, tpm, tpm / 60.0, now_ns()).await;
			}
		}
	}

	async fn check_bucket(&self, subject: &str, window: &str, cost: f64, rate_per_sec: f64, burst: f64) -> Result<(), ProxyError> {
		let key = bucket_key(subject, window);
		let (admitted, retry_after_ms) = match &self.backend {
			Backend::Memory(mem) => mem.admit(&key, cost, burst, rate_per_sec),
			Backend::Shared(kv) => {
				let (ok, _) = kv.admit(&key, cost, burst, rate_per_sec, now_ns()).await.map_err(ProxyError::Internal)?;
				(ok, if ok { 0 } else { ((cost / rate_per_sec.max(f64::EPSILON)) * 1000.0).ceil() as u64 })
			}
		};
		if admitted {
			Ok(())
		} else {
			if let Some(metrics) = &self.metrics {
				metrics.rate_limited_total.inc();
			}
			Err(ProxyError::RateLimited { retry_after_ms })
		}
	}

	/// Acquires one concurrency slot for `api_key`, bounded by `max_concurrent` (spec
	/// §4.4 "Per-key concurrency: semaphore of size `max_concurrent`"). A no-op guard
	/// is returned when concurrency limiting is disabled.
	pub fn acquire_concurrency(&self, api_key: &str) -> Result<ConcurrencyGuard, ProxyError> {
		let Some(max) = self.cfg.max_concurrent else {
			return Ok(ConcurrencyGuard(None));
		};
		let sem = self
			.concurrency
			.entry(api_key.to_string())
			.or_insert_with(|| Arc::new(Semaphore::new(max as usize)))
			.clone();
		match sem.try_acquire_owned() {
			Ok(permit) => Ok(ConcurrencyGuard(Some(permit))),
			Err(_) => {
				if let Some(metrics) = &self.metrics {
					metrics.rate_limited_total.inc();
				}
				Err(ProxyError::RateLimited { retry_after_ms: 1000 })
			}
		}
	}
}

fn bucket_key(subject: &str, window: &str) -> String {
	format!("{subject}:{window}")
}

fn now_ns() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_nanos() as i64)
		.unwrap_or(0)
}
