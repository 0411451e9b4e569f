//! Agent registry: capabilities, agents, capability->agent reverse index,
//! and agent specs with declared state-key allowlists (spec §4.E).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;
use want_types::{Agent, AgentSpec, Capability};

#[derive(Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    capabilities: HashMap<String, Capability>,
    agents: HashMap<String, Agent>,
    /// gives-tag -> agent names providing it, kept in sync on registration.
    gives_index: HashMap<String, Vec<String>>,
    specs: HashMap<String, AgentSpec>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_capability(&self, capability: Capability) {
        let mut inner = self.inner.write().await;
        for tag in &capability.gives {
            let agents_for_tag = inner.gives_index.entry(tag.clone()).or_default();
            // Re-derive membership for agents already registered against this
            // capability, in case the capability is being re-registered with
            // a different `gives` set.
            for agent in inner.agents.values() {
                if agent.capabilities.contains(&capability.name) && !agents_for_tag.contains(&agent.name) {
                    agents_for_tag.push(agent.name.clone());
                }
            }
        }
        inner.capabilities.insert(capability.name.clone(), capability);
    }

    pub async fn register_agent(&self, agent: Agent) {
        let mut inner = self.inner.write().await;
        let capability_gives: Vec<(String, Vec<String>)> = agent
            .capabilities
            .iter()
            .filter_map(|cap_name| {
                inner
                    .capabilities
                    .get(cap_name)
                    .map(|cap| (cap_name.clone(), cap.gives.clone()))
            })
            .collect();

        for (_, gives) in &capability_gives {
            for tag in gives {
                let bucket = inner.gives_index.entry(tag.clone()).or_default();
                if !bucket.contains(&agent.name) {
                    bucket.push(agent.name.clone());
                }
            }
        }
        inner.agents.insert(agent.name.clone(), agent);
    }

    /// `allowed_state_keys` may legitimately be empty — "strict mode" — and
    /// is still registered so writes to undeclared keys can be flagged.
    pub async fn register_agent_spec(&self, spec: AgentSpec) {
        let mut inner = self.inner.write().await;
        inner.specs.insert(spec.name.clone(), spec);
    }

    /// Agents whose capabilities include one whose `gives` contains `tag`.
    pub async fn find_agents_by_gives(&self, tag: &str) -> Vec<Agent> {
        let inner = self.inner.read().await;
        let direct: HashSet<&str> = inner
            .gives_index
            .get(tag)
            .map(|v| v.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default();

        // A requirement may also name a capability directly; expand its
        // gives set and union the result.
        let via_capability: HashSet<&str> = inner
            .capabilities
            .get(tag)
            .map(|cap| {
                cap.gives
                    .iter()
                    .flat_map(|g| {
                        inner
                            .gives_index
                            .get(g)
                            .map(|v| v.iter().map(|s| s.as_str()).collect::<Vec<_>>())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut names: Vec<&str> = direct.union(&via_capability).copied().collect();
        names.sort_unstable();
        names
            .into_iter()
            .filter_map(|name| inner.agents.get(name).cloned())
            .collect()
    }

    pub async fn get_agent(&self, name: &str) -> Option<Agent> {
        self.inner.read().await.agents.get(name).cloned()
    }

    pub async fn get_spec(&self, name: &str) -> Option<AgentSpec> {
        self.inner.read().await.specs.get(name).cloned()
    }

    /// Validate a state-key write for `agent_name`. Internal keys (leading
    /// `_`) always pass. Undeclared keys are logged as a warning but the
    /// write is still applied, for backward compatibility (spec §7).
    pub async fn validate_state_write(&self, agent_name: &str, key: &str) {
        if key.starts_with('_') {
            return;
        }
        let inner = self.inner.read().await;
        if let Some(spec) = inner.specs.get(agent_name) {
            if !spec.allowed_state_keys.is_empty() && !spec.allowed_state_keys.iter().any(|k| k == key) {
                warn!(agent = agent_name, key, "agent wrote undeclared state key");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use want_types::{AgentType, ExecutionConfig, ExecutionMode};

    fn local_agent(name: &str, caps: Vec<&str>) -> Agent {
        Agent {
            name: name.to_string(),
            agent_type: AgentType::Do,
            capabilities: caps.into_iter().map(String::from).collect(),
            execution: ExecutionConfig {
                mode: ExecutionMode::Local,
                webhook: None,
                rpc: None,
            },
        }
    }

    #[tokio::test]
    async fn find_by_gives_direct() {
        let registry = AgentRegistry::new();
        registry
            .register_capability(Capability {
                name: "booking".into(),
                gives: vec!["confirm_booking".into()],
            })
            .await;
        registry.register_agent(local_agent("booker", vec!["booking"])).await;

        let found = registry.find_agents_by_gives("confirm_booking").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "booker");
    }

    #[tokio::test]
    async fn find_by_gives_via_capability_name() {
        let registry = AgentRegistry::new();
        registry
            .register_capability(Capability {
                name: "booking".into(),
                gives: vec!["confirm_booking".into()],
            })
            .await;
        registry.register_agent(local_agent("booker", vec!["booking"])).await;

        let found = registry.find_agents_by_gives("booking").await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn undeclared_key_does_not_block_write() {
        let registry = AgentRegistry::new();
        registry
            .register_agent_spec(AgentSpec {
                name: "booker".into(),
                allowed_state_keys: vec!["booking_id".into()],
                key_descriptions: Default::default(),
            })
            .await;
        // should not panic or error; warning only
        registry.validate_state_write("booker", "unexpected_key").await;
        registry.validate_state_write("booker", "_internal").await;
    }
}
