//! Routing: backend selection, health tracking, retry/backoff and model-tag fallback
//! (spec §4.2). Grounded on the teacher's `proxy::httpproxy::HTTPProxy` attempt loop,
//! which fans the same shape out over `select_backend` → `send` → `should_retry`.

pub mod balancer;
pub mod fallback;
pub mod health;
pub mod pool;
pub mod retry;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use std::sync::Arc;

use crate::config::{BalancingStrategy, Config};
use crate::error::{ProxyError, ProxyResult};
use crate::telemetry::Metrics;
use crate::types::duration_ms;

pub use pool::SharedPool;
pub use retry::RetryPolicy;

pub struct DispatchOutcome {
	pub response: reqwest::Response,
	pub backend_name: String,
	pub backend_url: String,
	pub attempts: u32,
	pub latency_ms: u64,
}

pub struct Router {
	pool: SharedPool,
	client: reqwest::Client,
	strategy: BalancingStrategy,
	retry: RetryPolicy,
	fallback: Vec<crate::config::FallbackRule>,
	read_timeout: std::time::Duration,
	metrics: Option<Arc<Metrics>>,
}

impl Router {
	pub fn new(pool: SharedPool, client: reqwest::Client, cfg: &Config) -> Self {
		Self::with_metrics(pool, client, cfg, None)
	}

	pub fn with_metrics(pool: SharedPool, client: reqwest::Client, cfg: &Config, metrics: Option<Arc<Metrics>>) -> Self {
		Router {
			pool,
			client,
			strategy: cfg.routing.strategy,
			retry: RetryPolicy::from(&cfg.routing.retry),
			fallback: cfg.routing.fallback.clone(),
			read_timeout: cfg.read_timeout(),
			metrics,
		}
	}

	pub fn pool(&self) -> &SharedPool {
		&self.pool
	}

	/// Selects a backend, dispatches the request, retrying per policy and falling back
	/// to model-tagged alternates when the primary is exhausted (spec §4.2). The
	/// request body has already been fully buffered by the caller (spec §4.1), so a
	/// retry or fallback attempt is just resending the same `Bytes`.
	pub async fn dispatch(
		&self,
		method: Method,
		path: &str,
		headers: HeaderMap,
		body: Bytes,
		model_tag: Option<&str>,
		cancellation: &CancellationToken,
	) -> ProxyResult<DispatchOutcome> {
		let mut rr_cursor_holder = self.pool.next_rr();
		let primary_idx = {
			let guard = self.pool.read();
			balancer::select(&guard, self.strategy, &mut rr_cursor_holder).map_err(|_| ProxyError::NoHealthyBackend)?
		};
		let primary_name = self.pool.read().backends[primary_idx].name.clone();

		let mut attempts = 0u32;
		match self
			.attempt_backend(&primary_name, &method, path, &headers, &body, cancellation, &mut attempts)
			.await
		{
			Ok(outcome) => return Ok(outcome),
			Err(err) if cancellation.is_cancelled() => return Err(err),
			Err(last_err) => {
				for fallback_name in fallback::fallback_chain(&self.fallback, &primary_name, model_tag) {
					warn!(primary = %primary_name, fallback = %fallback_name, "falling back after exhausted retries");
					if let Some(metrics) = &self.metrics {
						metrics.retries_total.inc();
					}
					match self
						.attempt_backend(fallback_name, &method, path, &headers, &body, cancellation, &mut attempts)
						.await
					{
						Ok(outcome) => return Ok(outcome),
						Err(_) => continue,
					}
				}
				Err(last_err)
			}
		}
	}

	/// Runs the full retry loop against a single named backend.
	async fn attempt_backend(
		&self,
		backend_name: &str,
		method: &Method,
		path: &str,
		headers: &HeaderMap,
		body: &Bytes,
		cancellation: &CancellationToken,
		attempts: &mut u32,
	) -> ProxyResult<DispatchOutcome> {
		let max_attempts = if self.retry.enabled { self.retry.max_retries + 1 } else { 1 };
		let mut last_err = ProxyError::NoHealthyBackend;

		for attempt in 0..max_attempts {
			let Some(backend_url) = self.pool.find_by_name(backend_name).map(|b| b.url) else {
				return Err(ProxyError::NoHealthyBackend);
			};
			{
				let mut guard = self.pool.write();
				if let Some(b) = guard.backends.iter_mut().find(|b| b.name == backend_name) {
					balancer::on_dispatch(b);
				}
			}

			let target = backend_url.join(path.trim_start_matches('/')).unwrap_or(backend_url.clone());
			let started = std::time::Instant::now();
			let send_fut = self.client.request(method.clone(), target).headers(headers.clone()).body(body.clone()).send();

			let result = tokio::select! {
				biased;
				_ = cancellation.cancelled() => Err(ProxyError::ClientCancelled),
				res = tokio::time::timeout(self.read_timeout, send_fut) => classify(res),
			};

			let latency_ms = duration_ms(started.elapsed());
			{
				let mut guard = self.pool.write();
				if let Some(b) = guard.backends.iter_mut().find(|b| b.name == backend_name) {
					if matches!(result, Err(ProxyError::ClientCancelled)) {
						balancer::on_cancel(b);
					} else {
						balancer::on_complete(b, latency_ms as f64);
					}
				}
			}

			*attempts += 1;
			match result {
				Ok(response) => {
					let status = response.status();
					let retry_on_status = status.is_server_error() && self.retry.enabled && self.retry.retry_on.server_error;
					if retry_on_status && attempt + 1 < max_attempts {
						last_err = ProxyError::BackendStatus(status);
						if let Some(metrics) = &self.metrics {
							metrics.retries_total.inc();
						}
						tokio::time::sleep(self.retry.backoff(attempt)).await;
						continue;
					}
					// Either a non-5xx status, or a 5xx we've exhausted retries for:
					// forward the backend's actual response body to the client rather
					// than synthesizing an error (spec §4.1 passthrough contract).
					return Ok(DispatchOutcome {
						response,
						backend_name: backend_name.to_string(),
						backend_url: target_display(&backend_url),
						attempts: *attempts,
						latency_ms,
					});
				}
				Err(err) => {
					let retryable = retry::is_retry_eligible(&err, &self.retry);
					last_err = err;
					if !retryable || attempt + 1 >= max_attempts {
						break;
					}
					if let Some(metrics) = &self.metrics {
						metrics.retries_total.inc();
					}
					tokio::time::sleep(self.retry.backoff(attempt)).await;
				}
			}
		}
		Err(last_err)
	}
}

fn target_display(url: &url::Url) -> String {
	url.as_str().trim_end_matches('/').to_string()
}

fn classify(res: Result<Result<reqwest::Response, reqwest::Error>, tokio::time::error::Elapsed>) -> ProxyResult<reqwest::Response> {
	match res {
		Err(_) => Err(ProxyError::Timeout),
		Ok(Err(e)) => {
			if e.is_timeout() {
				Err(ProxyError::Timeout)
			} else if e.is_connect() {
				Err(ProxyError::ConnectFailure)
			} else {
				Err(ProxyError::Internal(e.into()))
			}
		}
		Ok(Ok(resp)) => Ok(resp),
	}
}
