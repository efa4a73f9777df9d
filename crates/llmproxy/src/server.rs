//! HTTP surface wiring (spec §6 "Listen"). Grounded on the teacher's `main.rs`/`proxy`
//! axum `Router` assembly — one router merging the proxied paths, health, metrics, and
//! the token-gated admin surface behind a `tower::Layer`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router as AxumRouter;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tower_http::trace::TraceLayer;

use llmproxy_core::proxy::{proxy_handler, AppState};

use crate::admin::{self, AdminState};

pub fn build_router(app_state: Arc<AppState>, admin_state: Arc<AdminState>, registry: Arc<parking_lot::Mutex<Registry>>) -> AxumRouter {
	let proxy_routes = AxumRouter::new()
		.route("/v1/chat/completions", post(proxy_handler))
		.route("/v1/completions", post(proxy_handler))
		.with_state(app_state);

	let admin_routes = AxumRouter::new()
		.route("/admin/keys/create", post(admin::create_key))
		.route("/admin/keys/update", post(admin::update_key))
		.route("/admin/keys/delete", post(admin::delete_key))
		.route("/admin/keys/get", post(admin::get_key))
		.route("/admin/keys/list", post(admin::list_keys))
		.route("/admin/keys/sync", post(admin::sync_keys))
		.layer(axum::middleware::from_fn_with_state(admin_state.clone(), admin::require_admin_token))
		.with_state(admin_state);

	AxumRouter::new()
		.route("/health", get(health))
		.route("/metrics", get(move || metrics(registry.clone())))
		.merge(proxy_routes)
		.merge(admin_routes)
		.layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
	"OK"
}

async fn metrics(registry: Arc<parking_lot::Mutex<Registry>>) -> String {
	let mut buf = String::new();
	if let Err(e) = encode(&mut buf, &registry.lock()) {
		tracing::error!(error = %e, "failed to encode metrics");
	}
	buf
}
