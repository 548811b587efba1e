//! One circuit breaker per agent, created on first use.

use std::sync::Arc;

use agentflow_types::config::CircuitBreakerConfig;
use dashmap::DashMap;

use super::breaker::{BreakerStatus, CircuitBreaker};

/// Concurrent map of agent id to its breaker.
///
/// Breakers are handed out as `Arc` clones so no map guard is held while a
/// call runs.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Breaker for `agent_id`, creating a closed one if none exists yet.
    pub fn get(&self, agent_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(agent_id) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .breakers
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(agent_id, self.config.clone())));
        Arc::clone(entry.value())
    }

    /// Status of every known breaker, sorted by agent id.
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| Arc::clone(e.value())).collect();
        let mut statuses: Vec<BreakerStatus> = breakers.iter().map(|b| b.status()).collect();
        statuses.sort_by(|a, b| a.target.cmp(&b.target));
        statuses
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;

    #[test]
    fn test_same_agent_shares_breaker() {
        let registry = BreakerRegistry::default();
        let a = registry.get("billing");
        let b = registry.get("billing");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_agents_are_isolated() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        });
        registry.get("billing").record_failure("down");

        assert_eq!(registry.get("billing").state(), CircuitState::Open);
        assert_eq!(registry.get("search").state(), CircuitState::Closed);
    }

    #[test]
    fn test_statuses_sorted_by_target() {
        let registry = BreakerRegistry::default();
        registry.get("zeta");
        registry.get("alpha");
        let targets: Vec<String> = registry.statuses().into_iter().map(|s| s.target).collect();
        assert_eq!(targets, vec!["alpha", "zeta"]);
    }
}
