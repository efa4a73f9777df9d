//! Background health checker (spec §4.2): "A single background task per pool, not per
//! backend." Grounded on the teacher's `proxy::httpproxy` health-probe loop, generalized
//! from its single always-HTTP-1 probe to the configurable per-backend `health_path`.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HealthCheckConfig;

use super::pool::SharedPool;

/// Spawns the checker loop; returns immediately, the task runs until `shutdown` fires.
pub fn spawn(
	pool: SharedPool,
	client: reqwest::Client,
	cfg: HealthCheckConfig,
	shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs));
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => {
					debug!("health checker shutting down");
					return;
				}
				_ = ticker.tick() => {
					run_once(&pool, &client, &cfg).await;
				}
			}
		}
	})
}

async fn run_once(pool: &SharedPool, client: &reqwest::Client, cfg: &HealthCheckConfig) {
	let targets: Vec<(String, url::Url)> = {
		let guard = pool.read();
		guard
			.backends
			.iter()
			.map(|b| (b.name.clone(), b.url.join(&b.health_path).unwrap_or_else(|_| b.url.clone())))
			.collect()
	};

	for (name, probe_url) in targets {
		let outcome = tokio::time::timeout(Duration::from_secs(cfg.timeout_secs), client.get(probe_url.clone()).send())
			.await
			.ok()
			.and_then(|r| r.ok())
			.map(|resp| resp.status().is_success())
			.unwrap_or(false);

		let mut guard = pool.write();
		let Some(backend) = guard.backends.iter_mut().find(|b| b.name == name) else {
			continue;
		};

		let mut just_recovered = false;
		let mut just_failed = false;

		if outcome {
			backend.consecutive_successes += 1;
			backend.consecutive_failures = 0;
			// Cold-start protection: a brand new backend needs `healthy_threshold`
			// consecutive passes before it is trusted, same as a recovering one.
			if !backend.ever_passed && backend.consecutive_successes >= cfg.healthy_threshold {
				backend.ever_passed = true;
			}
			if !backend.healthy && backend.consecutive_successes >= cfg.healthy_threshold {
				just_recovered = true;
			}
		} else {
			backend.consecutive_failures += 1;
			backend.consecutive_successes = 0;
			if backend.healthy && backend.consecutive_failures >= cfg.unhealthy_threshold {
				just_failed = true;
			}
		}

		if just_recovered {
			info!(backend = %name, "backend recovered, marking healthy");
			guard.mark_healthy(&name, true);
		} else if just_failed {
			warn!(backend = %name, "backend failed health check, marking unhealthy");
			guard.mark_healthy(&name, false);
		}
	}
}
