//! Drives the background health checker against a real HTTP mock, exercising the
//! healthy -> unhealthy transition end to end: three consecutive failing checks mark a
//! backend unhealthy, and a backend that has never passed a check is not evicted on its
//! first failure.

use std::time::Duration;

use llmproxy_core::config::HealthCheckConfig;
use llmproxy_core::router::health;
use llmproxy_core::router::SharedPool;
use llmproxy_core::types::Backend;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn three_consecutive_failures_mark_backend_unhealthy() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/health"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&server)
		.await;

	let url = url::Url::parse(&server.uri()).unwrap();
	let backend = Backend::new("primary", url, 1, "/health");
	let pool = SharedPool::new(vec![backend]);

	let cfg = HealthCheckConfig {
		interval_secs: 1,
		timeout_secs: 1,
		healthy_threshold: 2,
		unhealthy_threshold: 3,
	};
	let shutdown = CancellationToken::new();
	let handle = health::spawn(pool.clone(), reqwest::Client::new(), cfg, shutdown.clone());

	tokio::time::sleep(Duration::from_millis(3_600)).await;
	shutdown.cancel();
	let _ = handle.await;

	let guard = pool.read();
	let backend = guard.backends.iter().find(|b| b.name == "primary").unwrap();
	assert!(!backend.healthy, "backend should be unhealthy after 3 consecutive failures");
	assert!(backend.consecutive_failures >= 3);
}

#[tokio::test]
async fn backend_that_never_passed_is_not_evicted_early() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/health"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&server)
		.await;

	let url = url::Url::parse(&server.uri()).unwrap();
	let backend = Backend::new("primary", url, 1, "/health");
	let pool = SharedPool::new(vec![backend]);

	let cfg = HealthCheckConfig {
		interval_secs: 1,
		timeout_secs: 1,
		healthy_threshold: 2,
		unhealthy_threshold: 3,
	};
	let shutdown = CancellationToken::new();
	let handle = health::spawn(pool.clone(), reqwest::Client::new(), cfg, shutdown.clone());

	// After a single failed tick the backend has never passed a check and must still
	// be considered healthy: the cold-start carve-out must not invert into an early
	// eviction on the very first failure.
	tokio::time::sleep(Duration::from_millis(1_300)).await;
	{
		let guard = pool.read();
		let backend = guard.backends.iter().find(|b| b.name == "primary").unwrap();
		assert!(backend.healthy, "a single failure must not evict a never-passed backend");
	}

	shutdown.cancel();
	let _ = handle.await;
}
