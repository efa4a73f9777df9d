//! Error taxonomy for the proxy datapath (spec §7).
//!
//! Mirrors the teacher's `proxy::ProxyError`: one variant per failure kind, a
//! `is_retryable` predicate the router consults, and an `into_response` that renders
//! the `{"error":...,"code":...}` body spec §6 requires.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("request body exceeds the configured maximum size")]
	MalformedRequest,

	#[error("missing API key")]
	MissingKey,

	#[error("invalid API key")]
	InvalidKey,

	#[error("{message}")]
	AccessDenied { code: u16, message: String },

	#[error("rate limit exceeded")]
	RateLimited { retry_after_ms: u64 },

	#[error("no healthy backend available")]
	NoHealthyBackend,

	#[error("failed to connect to backend")]
	ConnectFailure,

	#[error("backend read timed out")]
	Timeout,

	#[error("backend returned {0}")]
	BackendStatus(StatusCode),

	#[error("client disconnected")]
	ClientCancelled,

	#[error("auth script failed: {0}")]
	ScriptError(String),

	#[error("internal error: {0}")]
	Internal(#[from] anyhow::Error),
}

impl ProxyError {
	/// Whether the router may retry the request after this failure (spec §4.2/§7).
	///
	/// Only consulted before the first byte has reached the client — callers must not
	/// invoke this once any response bytes have been flushed downstream.
	pub fn is_retryable(&self, retry_on: &crate::router::retry::RetryOn) -> bool {
		match self {
			ProxyError::ConnectFailure => retry_on.connect_failure,
			ProxyError::Timeout => retry_on.timeout,
			ProxyError::BackendStatus(s) if s.is_server_error() => retry_on.server_error,
			_ => false,
		}
	}

	pub fn status_code(&self) -> StatusCode {
		match self {
			ProxyError::MalformedRequest => StatusCode::PAYLOAD_TOO_LARGE,
			ProxyError::MissingKey | ProxyError::InvalidKey => StatusCode::UNAUTHORIZED,
			ProxyError::AccessDenied { code, .. } => {
				StatusCode::from_u16(*code).unwrap_or(StatusCode::FORBIDDEN)
			},
			ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
			ProxyError::NoHealthyBackend => StatusCode::SERVICE_UNAVAILABLE,
			ProxyError::ConnectFailure => StatusCode::BAD_GATEWAY,
			ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
			ProxyError::BackendStatus(s) => *s,
			ProxyError::ClientCancelled => StatusCode::from_u16(499).unwrap(),
			ProxyError::ScriptError(_) => StatusCode::INTERNAL_SERVER_ERROR,
			ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// The message surfaced in the JSON error body. Backend status passthrough never
	/// reaches here — the caller relays the upstream body verbatim instead (spec §7).
	fn message(&self) -> String {
		match self {
			ProxyError::MissingKey => "missing_key".to_string(),
			ProxyError::InvalidKey => "invalid_key".to_string(),
			ProxyError::AccessDenied { message, .. } => message.clone(),
			ProxyError::RateLimited { .. } => "rate_limited".to_string(),
			other => other.to_string(),
		}
	}
}

impl IntoResponse for ProxyError {
	fn into_response(self) -> Response {
		let status = self.status_code();
		let retry_after_ms = if let ProxyError::RateLimited { retry_after_ms } = &self {
			Some(*retry_after_ms)
		} else {
			None
		};
		let body = Json(json!({
			"error": self.message(),
			"code": status.as_u16(),
		}));
		let mut resp = (status, body).into_response();
		if let Some(ms) = retry_after_ms {
			let secs = ms.div_ceil(1000).max(1);
			if let Ok(hv) = axum::http::HeaderValue::from_str(&secs.to_string()) {
				resp.headers_mut().insert(axum::http::header::RETRY_AFTER, hv);
			}
		}
		resp
	}
}

pub type ProxyResult<T> = Result<T, ProxyError>;
