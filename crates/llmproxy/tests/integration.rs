//! End-to-end tests driving the assembled axum app against a real `wiremock` backend:
//! streaming passthrough and retry-then-success. These bind a real `TcpListener` and
//! talk to it over HTTP rather than calling `proxy_handler` directly, exercising the
//! exact path a client request takes through the server.

use std::sync::Arc;

use axum::routing::post;
use axum::Router as AxumRouter;
use llmproxy_core::auth::AuthPipeline;
use llmproxy_core::client::Client;
use llmproxy_core::proxy::{proxy_handler, AppState};
use llmproxy_core::ratelimit::RateLimiter;
use llmproxy_core::router::{Router, SharedPool};
use llmproxy_core::store::{ApiKeyStore, InMemoryApiKeyStore};
use llmproxy_core::telemetry::Metrics;
use llmproxy_core::types::Backend;
use llmproxy_core::usage::UsageProcessor;
use llmproxy_core::{parse_config, Config};
use prometheus_client::registry::Registry;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn_app(config_yaml: String) -> (String, reqwest::Client) {
	let config = Arc::new(parse_config(&config_yaml).unwrap());
	build_and_serve(config).await
}

async fn build_and_serve(config: Arc<Config>) -> (String, reqwest::Client) {
	let client = Client::new(&config.server).unwrap();

	let backends: Vec<Backend> = config
		.backends
		.iter()
		.map(|b| {
			let url = url::Url::parse(&b.url).unwrap();
			Backend::new(b.name.clone(), url, b.weight, b.health_path.clone())
		})
		.collect();
	let pool = SharedPool::new(backends);

	let mut registry = Registry::default();
	let metrics = Arc::new(Metrics::new(&mut registry));

	let router = Router::with_metrics(pool, client.inner().clone(), &config, Some(metrics.clone()));
	let auth = AuthPipeline::new(config.auth.clone(), Vec::new());
	let rate_limiter = Arc::new(RateLimiter::with_metrics(config.rate_limit.clone(), None, Some(metrics.clone())));

	let key_store: Arc<dyn ApiKeyStore> = Arc::new(InMemoryApiKeyStore::new());
	let usage = Arc::new(UsageProcessor::new(Vec::new(), key_store, metrics, Some(rate_limiter.clone())));

	let app_state = Arc::new(AppState {
		config: config.clone(),
		router,
		auth,
		rate_limiter,
		usage,
	});

	let app = AxumRouter::new()
		.route("/v1/chat/completions", post(proxy_handler))
		.route("/v1/completions", post(proxy_handler))
		.with_state(app_state);

	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});

	(format!("http://{addr}"), reqwest::Client::new())
}

fn config_for(backend_url: &str, retry_enabled: bool) -> String {
	format!(
		r#"
server:
  listen: "127.0.0.1:0"
backends:
  - name: primary
    url: "{backend_url}"
routing:
  retry:
    enabled: {retry_enabled}
    max_retries: 1
    initial_wait_ms: 10
    max_wait_ms: 50
auth:
  skip_paths: ["/v1"]
"#
	)
}

#[tokio::test]
async fn streaming_response_is_relayed_without_buffering() {
	let backend = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/v1/chat/completions"))
		.respond_with(
			ResponseTemplate::new(200)
				.insert_header("content-type", "text/event-stream")
				.set_body_string("data: {\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":5,\"total_tokens\":8}}\n\ndata: [DONE]\n\n"),
		)
		.mount(&backend)
		.await;

	let (base, client) = spawn_app(config_for(&backend.uri(), false)).await;

	let resp = client
		.post(format!("{base}/v1/chat/completions"))
		.json(&serde_json::json!({"model": "gpt", "stream": true}))
		.send()
		.await
		.unwrap();

	assert_eq!(resp.status(), reqwest::StatusCode::OK);
	let body = resp.text().await.unwrap();
	assert!(body.contains("total_tokens"));
	assert!(body.contains("[DONE]"));
}

#[tokio::test]
async fn failed_attempt_is_retried_and_succeeds() {
	let backend = MockServer::start().await;
	// Mounted first so it stays the fallback once the limited mock below is
	// exhausted: wiremock prefers the most-recently-mounted matching mock while it
	// still has calls left, then falls through to this one.
	Mock::given(method("POST"))
		.and(path("/v1/chat/completions"))
		.respond_with(ResponseTemplate::new(200).set_body_string("{\"choices\":[]}"))
		.mount(&backend)
		.await;
	Mock::given(method("POST"))
		.and(path("/v1/chat/completions"))
		.respond_with(ResponseTemplate::new(503))
		.up_to_n_times(1)
		.mount(&backend)
		.await;

	let (base, client) = spawn_app(config_for(&backend.uri(), true)).await;

	let resp = client
		.post(format!("{base}/v1/chat/completions"))
		.json(&serde_json::json!({"model": "gpt", "stream": false}))
		.send()
		.await
		.unwrap();

	assert_eq!(resp.status(), reqwest::StatusCode::OK);
	let body = resp.text().await.unwrap();
	assert!(body.contains("choices"));
}
