//! Load balancing strategies

use ferrule_core::{LoadBalanceStrategy, ServiceMetaInfo};
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Virtual positions per candidate on the hash ring
pub const VIRTUAL_NODES: usize = 100;

/// Routing key of a call, e.g. `{"methodName": "get_user"}`
pub type RoutingParams = BTreeMap<String, String>;

/// Routing parameters for a method call
pub fn routing_params(method_name: &str) -> RoutingParams {
    let mut params = RoutingParams::new();
    params.insert("methodName".to_string(), method_name.to_string());
    params
}

/// Load balancer for distributing calls across provider instances
pub struct LoadBalancer {
    /// Load balancing strategy
    strategy: LoadBalanceStrategy,
    /// Counter for round-robin, shared by every caller
    counter: AtomicUsize,
}

impl LoadBalancer {
    /// Create a new load balancer
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self {
            strategy,
            counter: AtomicUsize::new(0),
        }
    }

    /// Select an instance from the candidates
    pub fn select<'a>(
        &self,
        params: &RoutingParams,
        candidates: &'a [ServiceMetaInfo],
    ) -> Option<&'a ServiceMetaInfo> {
        match candidates {
            [] => return None,
            [only] => return Some(only),
            _ => {}
        }

        let selected = match self.strategy {
            LoadBalanceStrategy::RoundRobin => {
                let idx = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
                &candidates[idx]
            }
            LoadBalanceStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                &candidates[idx]
            }
            LoadBalanceStrategy::ConsistentHash => consistent_hash(params, candidates)?,
        };

        debug!(
            strategy = %self.strategy,
            selected = %selected.service_address(),
            total_candidates = candidates.len(),
            "Selected instance"
        );

        Some(selected)
    }

    /// Get the current strategy
    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalanceStrategy::RoundRobin)
    }
}

/// Pick from a ring built fresh out of the current candidates
fn consistent_hash<'a>(
    params: &RoutingParams,
    candidates: &'a [ServiceMetaInfo],
) -> Option<&'a ServiceMetaInfo> {
    let mut ring: BTreeMap<u64, &'a ServiceMetaInfo> = BTreeMap::new();
    for candidate in candidates {
        let address = candidate.service_address();
        for replica in 0..VIRTUAL_NODES {
            ring.insert(hash_of(&format!("{}#{}", address, replica)), candidate);
        }
    }

    let key = hash_of(params);
    ring.range(key..)
        .next()
        .or_else(|| ring.iter().next())
        .map(|(_, candidate)| *candidate)
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
