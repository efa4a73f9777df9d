//! The process-wide pooled backend HTTP client (spec §4.1: "one process-wide HTTP
//! client with a connection pool, `MaxIdleConnsPerHost` >= 10; connect timeout bounded,
//! write timeout on streaming unbounded"). The teacher hand-rolls a `tower::Service`
//! connector on top of `hyper_util`'s legacy pooled client (`client/mod.rs`); this
//! crate uses `reqwest` instead, which exposes the same pool-size/keep-alive knobs with
//! far less code and gives us a `Stream`-based response body for free — see
//! `DESIGN.md` for why this substitution was made instead of re-deriving the teacher's
//! connector.

use std::time::Duration;

use anyhow::Context;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct Client {
	inner: reqwest::Client,
}

impl Client {
	pub fn new(cfg: &ServerConfig) -> anyhow::Result<Self> {
		let inner = reqwest::Client::builder()
			.pool_max_idle_per_host(cfg.max_idle_conns_per_host)
			.pool_idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
			.connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
			// Streaming writes are unbounded by design (spec §4.1); only the
			// connect phase is time-boxed above. Reads are bounded per-request by
			// the caller via `tokio::time::timeout` around the header await.
			.tcp_keepalive(Duration::from_secs(60))
			.build()
			.context("failed to build backend HTTP client")?;
		Ok(Client { inner })
	}

	pub fn inner(&self) -> &reqwest::Client {
		&self.inner
	}
}
