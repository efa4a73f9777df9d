//! Balancing strategies (spec §4.2 table). Grounded on the teacher's
//! `proxy::httpproxy::select_backend`/`load_balance` (weighted random choice over a
//! candidate set rebuilt from the pool on each selection), generalized to the three
//! strategies spec.md names — the teacher only implements weighted-random, so
//! `least_connections` and `latency_based` are built fresh in the same idiom.

use crate::config::BalancingStrategy;
use crate::types::{Backend, BackendPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoHealthyBackend;

/// Selects a backend index into `pool.backends`. Stable insertion order is the
/// tie-break for every strategy (spec §4.2 table).
pub fn select(
	pool: &BackendPool,
	strategy: BalancingStrategy,
	rr_cursor: &mut u64,
) -> Result<usize, NoHealthyBackend> {
	match strategy {
		BalancingStrategy::RoundRobin => select_round_robin(pool, rr_cursor),
		BalancingStrategy::LeastConnections => select_least_connections(pool),
		BalancingStrategy::LatencyBased => select_latency_based(pool),
	}
}

fn healthy_indices(pool: &BackendPool) -> Vec<usize> {
	pool
		.backends
		.iter()
		.enumerate()
		.filter(|(_, b)| b.healthy)
		.map(|(i, _)| i)
		.collect()
}

/// Weighted round robin: a cursor advances through the healthy set's *weight-expanded*
/// sequence, so a backend with weight 3 appears three times as often as one with
/// weight 1, and over many selections each backend's share converges to
/// `weight / sum(weight)` (spec §8 "round-robin fairness").
fn select_round_robin(pool: &BackendPool, cursor: &mut u64) -> Result<usize, NoHealthyBackend> {
	let healthy = healthy_indices(pool);
	if healthy.is_empty() {
		return Err(NoHealthyBackend);
	}
	let total_weight: u64 = healthy.iter().map(|&i| pool.backends[i].weight as u64).sum();
	if total_weight == 0 {
		return Err(NoHealthyBackend);
	}
	let mut offset = *cursor % total_weight;
	*cursor = cursor.wrapping_add(1);
	for &i in &healthy {
		let w = pool.backends[i].weight as u64;
		if offset < w {
			return Ok(i);
		}
		offset -= w;
	}
	// Unreachable given the modulo above, but keep a safe fallback.
	Ok(healthy[0])
}

fn select_least_connections(pool: &BackendPool) -> Result<usize, NoHealthyBackend> {
	healthy_indices(pool)
		.into_iter()
		.min_by_key(|&i| (pool.backends[i].connections, i))
		.ok_or(NoHealthyBackend)
}

fn select_latency_based(pool: &BackendPool) -> Result<usize, NoHealthyBackend> {
	healthy_indices(pool)
		.into_iter()
		.min_by(|&a, &b| {
			let la = pool.backends[a].latency_ms;
			let lb = pool.backends[b].latency_ms;
			la.partial_cmp(&lb).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b))
		})
		.ok_or(NoHealthyBackend)
}

pub fn on_dispatch(backend: &mut Backend) {
	backend.connections += 1;
}

pub fn on_complete(backend: &mut Backend, latency_ms: f64) {
	backend.connections = backend.connections.saturating_sub(1);
	backend.record_latency(latency_ms);
}

pub fn on_cancel(backend: &mut Backend) {
	backend.connections = backend.connections.saturating_sub(1);
}
