//! Service-discovery sources (spec §1 out of scope: "specified only by the interfaces
//! the core uses"). Grounded on the teacher's `xds`/discovery client seam — a trait the
//! core polls on an interval, never a concrete Consul/k8s/etcd client embedded here.

use async_trait::async_trait;

use crate::types::Backend;

#[async_trait]
pub trait DiscoverySource: Send + Sync {
	/// Returns the current full set of backends known to the discovery source. The
	/// caller replaces the pool's backend list wholesale on each successful refresh.
	async fn discover(&self) -> anyhow::Result<Vec<Backend>>;
}

/// A discovery source that never changes — used when `discovery` is absent from
/// config and backends come solely from the static `backends:` list.
pub struct StaticDiscovery {
	backends: Vec<Backend>,
}

impl StaticDiscovery {
	pub fn new(backends: Vec<Backend>) -> Self {
		StaticDiscovery { backends }
	}
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
	async fn discover(&self) -> anyhow::Result<Vec<Backend>> {
		Ok(self.backends.clone())
	}
}
