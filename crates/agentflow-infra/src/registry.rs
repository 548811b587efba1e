//! Static agent registry backed by the `[[agents]]` config table.

use agentflow_core::transport::AgentLookup;
use agentflow_types::config::AgentConfig;
use agentflow_types::transport::{AgentEndpoint, TransportError};
use dashmap::DashMap;

/// In-memory agent id to endpoint table.
///
/// Entries can be added at runtime; lookups clone the endpoint out so no
/// map guard is held across an await.
#[derive(Debug, Default)]
pub struct StaticAgentRegistry {
    agents: DashMap<String, AgentEndpoint>,
}

impl StaticAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(agents: &[AgentConfig]) -> Self {
        let registry = Self::new();
        for agent in agents {
            registry.register(&agent.id, &agent.endpoint);
        }
        registry
    }

    /// Add or replace an agent.
    pub fn register(&self, agent_id: &str, endpoint: &str) {
        let previous = self.agents.insert(
            agent_id.to_string(),
            AgentEndpoint {
                agent_id: agent_id.to_string(),
                endpoint: endpoint.trim_end_matches('/').to_string(),
            },
        );
        if previous.is_some() {
            tracing::debug!(agent_id, endpoint, "replaced agent endpoint");
        }
    }

    pub fn unregister(&self, agent_id: &str) -> bool {
        self.agents.remove(agent_id).is_some()
    }

    /// Registered agent ids, sorted.
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl AgentLookup for StaticAgentRegistry {
    async fn resolve(&self, agent_id: &str) -> Result<AgentEndpoint, TransportError> {
        self.agents
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::AgentNotFound(agent_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents() -> Vec<AgentConfig> {
        vec![
            AgentConfig {
                id: "fetcher".into(),
                endpoint: "http://localhost:8081/".into(),
            },
            AgentConfig {
                id: "notifier".into(),
                endpoint: "http://localhost:8082".into(),
            },
        ]
    }

    #[tokio::test]
    async fn test_resolve_known_agent() {
        let registry = StaticAgentRegistry::from_config(&agents());
        let endpoint = registry.resolve("fetcher").await.unwrap();
        assert_eq!(endpoint.endpoint, "http://localhost:8081");
        assert_eq!(registry.agent_ids(), vec!["fetcher", "notifier"]);
    }

    #[tokio::test]
    async fn test_unknown_agent_not_found() {
        let registry = StaticAgentRegistry::from_config(&agents());
        let err = registry.resolve("ghost").await.unwrap_err();
        assert_eq!(err, TransportError::AgentNotFound("ghost".into()));
    }

    #[tokio::test]
    async fn test_register_replaces_and_unregister_removes() {
        let registry = StaticAgentRegistry::new();
        registry.register("a", "http://one");
        registry.register("a", "http://two");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("a").await.unwrap().endpoint, "http://two");

        assert!(registry.unregister("a"));
        assert!(registry.is_empty());
        assert!(!registry.unregister("a"));
    }
}
