//! Load balancing strategies over a snapshot of healthy instances.
//!
//! Each strategy filters out unhealthy or zero-weight instances before
//! selecting, then returns a [`Selection`] whose [`InFlightGuard`] releases
//! the least-conn counter on drop — covering every terminal path, including
//! panics during unwind, without requiring callers to remember to decrement.

use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::models::instance::ServiceInstance;

/// RAII handle released by the proxy engine's drop, on every terminal path.
pub struct InFlightGuard {
    counters: Option<Arc<RwLock<HashMap<String, AtomicU64>>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(counters) = &self.counters {
            let guard = counters.read().unwrap();
            if let Some(counter) = guard.get(&self.key) {
                counter.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

/// A selected instance plus the guard that releases any per-instance
/// bookkeeping (currently only meaningful for `least_conn`).
pub struct Selection {
    pub instance: ServiceInstance,
    pub guard: InFlightGuard,
}

fn eligible(instances: &[ServiceInstance]) -> Vec<&ServiceInstance> {
    instances.iter().filter(|i| i.healthy && i.weight > 0).collect()
}

pub trait LoadBalancer: Send + Sync {
    fn select(&self, instances: &[ServiceInstance]) -> Option<Selection>;
}

/// Monotonically increasing counter modulo the healthy set size, shared
/// per route and incremented under an atomic fetch-add.
#[derive(Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, instances: &[ServiceInstance]) -> Option<Selection> {
        let candidates = eligible(instances);
        if candidates.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(Selection {
            instance: candidates[idx].clone(),
            guard: InFlightGuard {
                counters: None,
                key: String::new(),
            },
        })
    }
}

#[derive(Default)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn select(&self, instances: &[ServiceInstance]) -> Option<Selection> {
        let candidates = eligible(instances);
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(Selection {
            instance: candidates[idx].clone(),
            guard: InFlightGuard {
                counters: None,
                key: String::new(),
            },
        })
    }
}

/// Selects the instance with the smallest in-flight count. The counter is
/// incremented here, on selection, and decremented by the returned guard's
/// `Drop` on completion (success or failure) — per the data model invariant
/// that in-flight counters decrement on every terminal request state.
#[derive(Default)]
pub struct LeastConnBalancer {
    counters: Arc<RwLock<HashMap<String, AtomicU64>>>,
}

impl LeastConnBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter_for(&self, key: &str) -> u64 {
        {
            let guard = self.counters.read().unwrap();
            if let Some(c) = guard.get(key) {
                return c.load(Ordering::Relaxed);
            }
        }
        let mut guard = self.counters.write().unwrap();
        guard.entry(key.to_string()).or_insert_with(|| AtomicU64::new(0));
        0
    }
}

impl LoadBalancer for LeastConnBalancer {
    fn select(&self, instances: &[ServiceInstance]) -> Option<Selection> {
        let candidates = eligible(instances);
        if candidates.is_empty() {
            return None;
        }
        let chosen = candidates
            .into_iter()
            .min_by_key(|i| self.counter_for(&i.key()))?
            .clone();
        let key = chosen.key();
        {
            let guard = self.counters.read().unwrap();
            match guard.get(&key) {
                Some(c) => {
                    c.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    drop(guard);
                    let mut write_guard = self.counters.write().unwrap();
                    write_guard
                        .entry(key.clone())
                        .or_insert_with(|| AtomicU64::new(0))
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Some(Selection {
            instance: chosen,
            guard: InFlightGuard {
                counters: Some(self.counters.clone()),
                key,
            },
        })
    }
}

pub fn build(strategy: crate::models::route::LbStrategy) -> Arc<dyn LoadBalancer> {
    use crate::models::route::LbStrategy;
    match strategy {
        LbStrategy::RoundRobin => Arc::new(RoundRobinBalancer::default()),
        LbStrategy::Random => Arc::new(RandomBalancer),
        LbStrategy::LeastConn => Arc::new(LeastConnBalancer::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn instance(id: &str, healthy: bool, weight: u32) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            weight,
            healthy,
            metadata: Map::new(),
        }
    }

    #[test]
    fn round_robin_cycles_through_candidates() {
        let lb = RoundRobinBalancer::default();
        let instances = vec![instance("a", true, 1), instance("b", true, 1)];
        let first = lb.select(&instances).unwrap().instance.id;
        let second = lb.select(&instances).unwrap().instance.id;
        assert_ne!(first, second);
    }

    #[test]
    fn excludes_unhealthy_and_zero_weight() {
        let lb = RoundRobinBalancer::default();
        let instances = vec![instance("a", false, 1), instance("b", true, 0)];
        assert!(lb.select(&instances).is_none());
    }

    #[test]
    fn least_conn_prefers_idle_instance() {
        let lb = LeastConnBalancer::new();
        let instances = vec![instance("a", true, 1), instance("b", true, 1)];
        let first = lb.select(&instances).unwrap();
        // "a" now has one in-flight; next selection should prefer "b".
        let second = lb.select(&instances).unwrap();
        assert_ne!(first.instance.id, second.instance.id);
    }

    #[test]
    fn least_conn_releases_on_guard_drop() {
        let lb = LeastConnBalancer::new();
        let instances = vec![instance("a", true, 1)];
        {
            let _sel = lb.select(&instances).unwrap();
            assert_eq!(lb.counter_for("127.0.0.1:8080"), 1);
        }
        assert_eq!(lb.counter_for("127.0.0.1:8080"), 0);
    }

    #[test]
    fn random_never_selects_excluded_instance() {
        let lb = RandomBalancer;
        let instances = vec![instance("a", false, 1), instance("b", true, 1)];
        for _ in 0..20 {
            assert_eq!(lb.select(&instances).unwrap().instance.id, "b");
        }
    }
}
