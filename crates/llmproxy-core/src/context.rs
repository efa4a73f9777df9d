//! Per-request context (spec §3 `RequestContext`). Exclusive to the task handling the
//! request; passed by reference to collaborators; destroyed on return. A single
//! `tokio_util::sync::CancellationToken`-style signal is the backbone for cancellation
//! propagation (spec §5/§9): every blocking primitive downstream accepts it rather than
//! the implementation reaching for a global interrupt handler.

use std::time::Instant;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct RequestContext {
	pub request_id: String,
	pub client_ip: String,
	pub path: String,
	pub method: Method,
	pub body: Bytes,
	pub stream: bool,
	pub api_key: Option<String>,
	pub t_received: Instant,
	pub t_first_byte: Option<Instant>,
	pub selected_backend: Option<String>,
	pub metadata: serde_json::Map<String, serde_json::Value>,
	pub cancellation: CancellationToken,
}

impl RequestContext {
	pub fn new(method: Method, path: String, headers: &HeaderMap, body: Bytes) -> Self {
		let request_id = Uuid::new_v4().to_string();
		let client_ip = client_ip_from_headers(headers).unwrap_or_else(|| "unknown".to_string());
		let stream = extract_stream_flag(&body);
		RequestContext {
			request_id,
			client_ip,
			path,
			method,
			body,
			stream,
			api_key: None,
			t_received: Instant::now(),
			t_first_byte: None,
			selected_backend: None,
			metadata: serde_json::Map::new(),
			cancellation: CancellationToken::new(),
		}
	}
}

/// Extracts only the top-level boolean `stream` field, leaving every other field of
/// the request body opaque (spec §4.1). A parse failure or missing field defaults to
/// non-streaming, matching the OpenAI-compatible default.
fn extract_stream_flag(body: &[u8]) -> bool {
	serde_json::from_slice::<serde_json::Value>(body)
		.ok()
		.and_then(|v| v.get("stream").and_then(|s| s.as_bool()))
		.unwrap_or(false)
}

/// Honors `X-Forwarded-For`/`X-Real-IP`, taking the leftmost value (spec §9: this
/// proxy assumes it runs behind a trusted L7; untrusted deployments should strip XFF
/// at ingress before it reaches us).
fn client_ip_from_headers(headers: &HeaderMap) -> Option<String> {
	if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
		if let Some(first) = xff.split(',').next() {
			let trimmed = first.trim();
			if !trimmed.is_empty() {
				return Some(trimmed.to_string());
			}
		}
	}
	headers
		.get("x-real-ip")
		.and_then(|v| v.to_str().ok())
		.map(|s| s.trim().to_string())
		.filter(|s| !s.is_empty())
}
