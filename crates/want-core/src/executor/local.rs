//! In-process agent execution: agents compiled directly into the engine
//! binary, registered by name against a Rust closure.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use want_types::{Agent, DynamicMap};

use super::{AgentOutcome, Executor};
use crate::error::{EngineError, Result};
use crate::want::Want;

pub type LocalAgentFn = Arc<
    dyn Fn(Arc<Want>, DynamicMap) -> Pin<Box<dyn Future<Output = Result<DynamicMap>> + Send>> + Send + Sync,
>;

#[derive(Clone, Default)]
pub struct LocalRegistry {
    fns: Arc<RwLock<HashMap<String, LocalAgentFn>>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, agent_name: impl Into<String>, f: LocalAgentFn) {
        self.fns.write().await.insert(agent_name.into(), f);
    }

    pub async fn get(&self, agent_name: &str) -> Option<LocalAgentFn> {
        self.fns.read().await.get(agent_name).cloned()
    }
}

pub struct LocalExecutor {
    registry: LocalRegistry,
}

impl LocalExecutor {
    pub fn new(registry: LocalRegistry) -> Self {
        Self { registry }
    }
}

/// Pull a human-readable message out of a caught panic payload.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "local agent panicked with a non-string payload".to_string()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, agent: &Agent, want: &Arc<Want>, timeout: Option<Duration>) -> Result<AgentOutcome> {
        let f = self
            .registry
            .get(&agent.name)
            .ok_or_else(|| EngineError::AgentNotFound(agent.name.clone()))?;

        let state = want.snapshot_state().await;
        let want_clone = want.clone();
        let agent_name = agent.name.clone();

        // Run the registered closure on its own task so a panic inside it
        // unwinds there, not through the reconciler's own task (spec §7:
        // "agent panic: caught at the executor boundary").
        let handle = tokio::spawn(async move {
            let call = f(want_clone, state);
            match timeout {
                Some(d) => tokio::time::timeout(d, call)
                    .await
                    .map_err(|_| EngineError::Transport(format!("local agent '{agent_name}' timed out")))?,
                None => call.await,
            }
        });

        match handle.await {
            Ok(Ok(updates)) => Ok(AgentOutcome::ok(updates)),
            Ok(Err(err)) => Ok(AgentOutcome::failed(err.to_string())),
            Err(join_err) if join_err.is_panic() => Err(EngineError::Panic(panic_message(join_err.into_panic()))),
            Err(join_err) => Err(EngineError::Transport(format!("local agent task was cancelled: {join_err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use want_types::{AgentType, Dynamic, ExecutionConfig, ExecutionMode, WantIdentity, WantMetadata, WantSpec};

    fn identity(name: &str) -> WantIdentity {
        WantIdentity {
            id: format!("id-{name}"),
            name: name.to_string(),
            want_type: "test".into(),
        }
    }

    #[tokio::test]
    async fn local_executor_invokes_registered_function() {
        let registry = LocalRegistry::new();
        registry
            .register(
                "echo",
                Arc::new(|_want, state| {
                    Box::pin(async move {
                        let mut out = DynamicMap::new();
                        out.insert("echoed".into(), Dynamic::Bool(!state.is_empty() || true));
                        Ok(out)
                    })
                }),
            )
            .await;

        let agent = Agent {
            name: "echo".into(),
            agent_type: AgentType::Do,
            capabilities: vec![],
            execution: ExecutionConfig {
                mode: ExecutionMode::Local,
                webhook: None,
                rpc: None,
            },
        };
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        let executor = LocalExecutor::new(registry);
        let outcome = executor.execute(&agent, &want, None).await.unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.state_updates.get("echoed"), Some(&Dynamic::Bool(true)));
    }

    #[tokio::test]
    async fn missing_local_agent_errors() {
        let registry = LocalRegistry::new();
        let agent = Agent {
            name: "missing".into(),
            agent_type: AgentType::Do,
            capabilities: vec![],
            execution: ExecutionConfig {
                mode: ExecutionMode::Local,
                webhook: None,
                rpc: None,
            },
        };
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        let executor = LocalExecutor::new(registry);
        assert!(executor.execute(&agent, &want, None).await.is_err());
    }

    #[tokio::test]
    async fn panicking_agent_is_caught_as_panic_error() {
        let registry = LocalRegistry::new();
        registry
            .register(
                "boom",
                Arc::new(|_want, _state| Box::pin(async move { panic!("kaboom") })),
            )
            .await;

        let agent = Agent {
            name: "boom".into(),
            agent_type: AgentType::Do,
            capabilities: vec![],
            execution: ExecutionConfig {
                mode: ExecutionMode::Local,
                webhook: None,
                rpc: None,
            },
        };
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        let executor = LocalExecutor::new(registry);
        let err = executor.execute(&agent, &want, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Panic(ref msg) if msg.contains("kaboom")));
    }
}
