//! Per-request structured logging (spec §5 "Ordering guarantees": the usage record for
//! request R happens-after R's response completion). Grounded on the teacher's
//! `telemetry::log::RequestLog`/`AsyncLog` — an interior-mutable cell that background
//! tasks (the usage extractor, reporters) can write into after the handler that
//! created it has already returned control to the runtime, with a single log line
//! emitted once, on completion, rather than scattered across every chunk.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;

use crate::types::Usage;

/// A write-once-ish, read-later cell. Cheap to clone (an `Arc` underneath) so it can be
/// handed to a spawned reporter/extractor task while the original handler moves on.
#[derive(Clone)]
pub struct AsyncLog<T>(Arc<Mutex<Option<T>>>);

impl<T> Default for AsyncLog<T> {
	fn default() -> Self {
		AsyncLog(Arc::new(Mutex::new(None)))
	}
}

impl<T: Clone> AsyncLog<T> {
	pub fn store(&self, value: T) {
		*self.0.lock() = Some(value);
	}

	pub fn get(&self) -> Option<T> {
		self.0.lock().clone()
	}

	pub fn mutate(&self, f: impl FnOnce(&mut T)) {
		if let Some(v) = self.0.lock().as_mut() {
			f(v)
		}
	}
}

/// Per-request log record. One is created when the proxy engine accepts a request and
/// emitted exactly once, when the response (streaming or not) has fully completed.
pub struct RequestLog {
	pub request_id: String,
	pub method: String,
	pub path: String,
	pub client_ip: String,
	pub t_received: Instant,
	pub backend_url: AsyncLog<String>,
	pub status: AsyncLog<u16>,
	pub retry_attempt: AsyncLog<u32>,
	pub auth_provider: AsyncLog<String>,
	pub rate_limit_scope: AsyncLog<String>,
	pub usage: AsyncLog<Usage>,
	pub error: AsyncLog<String>,
	pub cancelled: AsyncLog<bool>,
	emitted: bool,
}

impl RequestLog {
	pub fn new(request_id: String, method: String, path: String, client_ip: String) -> Self {
		RequestLog {
			request_id,
			method,
			path,
			client_ip,
			t_received: Instant::now(),
			backend_url: AsyncLog::default(),
			status: AsyncLog::default(),
			retry_attempt: AsyncLog::default(),
			auth_provider: AsyncLog::default(),
			rate_limit_scope: AsyncLog::default(),
			usage: AsyncLog::default(),
			error: AsyncLog::default(),
			cancelled: AsyncLog::default(),
			emitted: false,
		}
	}

	pub fn latency_ms(&self) -> u64 {
		crate::types::duration_ms(self.t_received.elapsed())
	}

	/// Emit the single summary event for this request. Idempotent; safe to call from
	/// both the normal completion path and a `Drop` backstop for cancelled requests.
	pub fn finish(&mut self) {
		if self.emitted {
			return;
		}
		self.emitted = true;
		let usage = self.usage.get();
		tracing::info!(
			request_id = %self.request_id,
			method = %self.method,
			path = %self.path,
			client_ip = %self.client_ip,
			backend_url = self.backend_url.get().unwrap_or_default(),
			status = self.status.get().unwrap_or(0),
			retry_attempt = self.retry_attempt.get().unwrap_or(0),
			auth_provider = self.auth_provider.get().unwrap_or_default(),
			prompt_tokens = usage.map(|u| u.prompt_tokens).unwrap_or(0),
			completion_tokens = usage.map(|u| u.completion_tokens).unwrap_or(0),
			total_tokens = usage.map(|u| u.total_tokens).unwrap_or(0),
			error = self.error.get().unwrap_or_default(),
			cancelled = self.cancelled.get().unwrap_or(false),
			latency_ms = self.latency_ms(),
			"request complete"
		);
	}

	pub fn request_body_json(&self, body: &[u8]) -> Option<Value> {
		serde_json::from_slice(body).ok()
	}
}

impl Drop for RequestLog {
	fn drop(&mut self) {
		self.finish();
	}
}
