//! Admin CRUD surface for API keys (spec §6 `/admin/keys/*`, token-gated via
//! `X-Admin-Token`). Specified only by the interface the core uses (spec §1); this is
//! a thin HTTP shim over `llmproxy_core::store::ApiKeyStore`, grounded on the teacher's
//! admin-token `tower::Layer` pattern for gating mutating endpoints.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use llmproxy_core::store::ApiKeyStore;
use llmproxy_core::types::ApiKey;
use serde::Deserialize;
use serde_json::json;

pub struct AdminState {
	pub token: String,
	pub store: Arc<dyn ApiKeyStore>,
}

pub async fn require_admin_token(State(state): State<Arc<AdminState>>, req: Request, next: Next) -> Response {
	let provided = req.headers().get("x-admin-token").and_then(|v| v.to_str().ok()).unwrap_or("");
	if provided != state.token || state.token.is_empty() {
		return (StatusCode::FORBIDDEN, Json(json!({"error": "forbidden", "code": 403}))).into_response();
	}
	next.run(req).await
}

#[derive(Deserialize)]
pub struct KeyRef {
	pub key: String,
}

pub async fn create_key(State(state): State<Arc<AdminState>>, Json(key): Json<ApiKey>) -> Response {
	match state.store.create(key).await {
		Ok(()) => StatusCode::CREATED.into_response(),
		Err(e) => internal_error(e),
	}
}

pub async fn update_key(State(state): State<Arc<AdminState>>, Json(key): Json<ApiKey>) -> Response {
	match state.store.update(key).await {
		Ok(()) => StatusCode::OK.into_response(),
		Err(e) => internal_error(e),
	}
}

pub async fn delete_key(State(state): State<Arc<AdminState>>, Json(req): Json<KeyRef>) -> Response {
	match state.store.delete(&req.key).await {
		Ok(()) => StatusCode::NO_CONTENT.into_response(),
		Err(e) => internal_error(e),
	}
}

pub async fn get_key(State(state): State<Arc<AdminState>>, Json(req): Json<KeyRef>) -> Response {
	match state.store.get(&req.key).await {
		Ok(Some(key)) => Json(key).into_response(),
		Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "not_found", "code": 404}))).into_response(),
		Err(e) => internal_error(e),
	}
}

pub async fn list_keys(State(state): State<Arc<AdminState>>) -> Response {
	match state.store.list().await {
		Ok(keys) => Json(keys).into_response(),
		Err(e) => internal_error(e),
	}
}

/// Re-reads the full key set from the store and returns it, mirroring the shape of
/// `list` (open question: the spec names a `sync` admin op but does not define what it
/// synchronizes against; since the backing store is an external interface per spec §1,
/// this crate treats `sync` as a manual cache-refresh signal with no local cache to
/// invalidate, so it degrades to `list`).
pub async fn sync_keys(State(state): State<Arc<AdminState>>) -> Response {
	list_keys(State(state)).await
}

fn internal_error(e: anyhow::Error) -> Response {
	tracing::error!(error = %e, "admin store operation failed");
	(StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal_error", "code": 500}))).into_response()
}
