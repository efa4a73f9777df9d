//! LLMProxy entry point (spec §6 "Exit codes"). Grounded on the teacher's `main.rs`:
//! parse flags, load and default config, init structured logging, wire the core
//! modules, spawn the background tasks, serve, then wait out graceful shutdown.

mod admin;
mod server;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio_util::sync::CancellationToken;

use llmproxy_core::auth::provider::Provider;
use llmproxy_core::auth::{AuthPipeline, AuthProviderHandle};
use llmproxy_core::client::Client;
use llmproxy_core::proxy::AppState;
use llmproxy_core::ratelimit::{shared::LocalSharedKv, RateLimiter, SharedKv};
use llmproxy_core::router::{Router, SharedPool};
use llmproxy_core::store::{ApiKeyStore, InMemoryApiKeyStore, InMemoryUsageStore, UsageStore};
use llmproxy_core::telemetry::Metrics;
use llmproxy_core::types::Backend;
use llmproxy_core::usage::reporter::{self, BuiltinReporter};
use llmproxy_core::usage::UsageProcessor;
use llmproxy_core::{parse_config, Config};

use admin::AdminState;

#[derive(Parser)]
#[command(name = "llmproxy", about = "Protocol-aware reverse proxy for LLM inference backends")]
struct Args {
	#[arg(short, long, default_value = "config.yaml")]
	config: String,
}

#[tokio::main]
async fn main() {
	if let Err(e) = run().await {
		tracing::error!(error = %e, "fatal startup error");
		eprintln!("llmproxy: {e:#}");
		std::process::exit(1);
	}
}

async fn run() -> anyhow::Result<()> {
	let args = Args::parse();
	init_tracing();

	let contents = std::fs::read_to_string(&args.config).with_context(|| format!("reading config file {}", args.config))?;
	let config = Arc::new(parse_config(&contents)?);

	let shutdown = CancellationToken::new();

	let client = Client::new(&config.server)?;
	let backends: Vec<Backend> = config
		.backends
		.iter()
		.map(|b| {
			let url = url::Url::parse(&b.url).with_context(|| format!("invalid backend url {}", b.url))?;
			let mut backend = Backend::new(b.name.clone(), url, b.weight, b.health_path.clone());
			backend.model_tags = b.model_tags.clone();
			Ok(backend)
		})
		.collect::<anyhow::Result<Vec<_>>>()?;
	let pool = SharedPool::new(backends);

	let mut registry = Registry::default();
	let metrics = Arc::new(Metrics::new(&mut registry));
	let registry = Arc::new(parking_lot::Mutex::new(registry));

	llmproxy_core::router::health::spawn(pool.clone(), client.inner().clone(), config.health_check.clone(), shutdown.clone());

	let router = Router::with_metrics(pool, client.inner().clone(), &config, Some(metrics.clone()));

	let key_store: Arc<dyn ApiKeyStore> = Arc::new(InMemoryApiKeyStore::new());
	let shared_kv: Arc<dyn SharedKv> = Arc::new(LocalSharedKv::new());

	let mut provider_handles = Vec::new();
	for entry in &config.auth.providers {
		let provider = Provider::from_config(&entry.provider, key_store.clone(), Some(shared_kv.clone()), None, client.inner().clone());
		provider_handles.push(AuthProviderHandle {
			name: entry.name.clone(),
			provider,
			script: entry.script.clone().map(Arc::from),
			enabled: entry.enabled,
		});
	}
	let auth = AuthPipeline::new(config.auth.clone(), provider_handles);

	let rate_limiter = Arc::new(RateLimiter::with_metrics(config.rate_limit.clone(), Some(shared_kv.clone()), Some(metrics.clone())));
	rate_limiter.spawn_janitor(shutdown.clone());

	let usage_store: Arc<dyn UsageStore> = Arc::new(InMemoryUsageStore::new());
	let reporters = reporter::build_reporters(&config.usage.reporters, client.inner().clone(), usage_store.clone());
	for cfg in &config.usage.reporters {
		if let llmproxy_core::config::ReporterConfig::Builtin { retention_days: Some(days) } = cfg {
			let builtin = Arc::new(BuiltinReporter::new(usage_store.clone(), Some(*days)));
			builtin.spawn_retention_sweeper(shutdown.clone());
		}
	}

	let usage = Arc::new(UsageProcessor::new(reporters, key_store.clone(), metrics, Some(rate_limiter.clone())));

	let app_state = Arc::new(AppState {
		config: config.clone(),
		router,
		auth,
		rate_limiter,
		usage,
	});

	let admin_state = Arc::new(AdminState {
		token: config.admin.token.clone(),
		store: key_store,
	});

	let app = server::build_router(app_state, admin_state, registry);

	let listener = tokio::net::TcpListener::bind(&config.server.listen)
		.await
		.with_context(|| format!("binding listener on {}", config.server.listen))?;
	tracing::info!(listen = %config.server.listen, "llmproxy listening");

	let grace = std::time::Duration::from_secs(config.server.shutdown_grace_secs);
	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal(shutdown.clone(), grace))
		.await
		.context("server error")?;

	Ok(())
}

/// Waits for SIGINT/SIGTERM, then cancels the shared shutdown token so background
/// tasks (health checker, janitor, sweepers) exit, and gives in-flight requests up to
/// `grace` before axum finishes draining connections (spec §5 "Graceful shutdown waits
/// up to 10s for in-flight requests to complete, then cancels").
async fn shutdown_signal(shutdown: CancellationToken, grace: std::time::Duration) {
	let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler") };

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
	tracing::info!("shutdown signal received, draining in-flight requests");
	shutdown.cancel();
	tokio::time::sleep(grace).await;
}

fn init_tracing() {
	use tracing_subscriber::{fmt, EnvFilter};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	fmt().with_env_filter(filter).with_target(true).json().init();
}
