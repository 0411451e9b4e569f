//! Pluggable agent-execution strategies (spec §4.F): Local, Webhook, and
//! RPC, behind one `Executor::execute` interface so the reconciler doesn't
//! care how an agent actually runs.

mod local;
mod rpc;
mod webhook;

pub use local::{LocalAgentFn, LocalExecutor, LocalRegistry};
pub use rpc::RpcExecutor;
pub use webhook::WebhookExecutor;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use want_types::{Agent, DynamicMap, ExecutionMode};

use crate::error::{EngineError, Result};
use crate::want::Want;

/// Outcome of one agent invocation, independent of which strategy ran it.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub state_updates: DynamicMap,
    pub error: Option<String>,
}

impl AgentOutcome {
    pub fn ok(state_updates: DynamicMap) -> Self {
        Self {
            state_updates,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state_updates: DynamicMap::new(),
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// DoAgent: synchronous, one result per call.
    async fn execute(&self, agent: &Agent, want: &Arc<Want>, timeout: Option<Duration>) -> Result<AgentOutcome>;

    /// MonitorAgent: one tick of a (possibly periodic) monitor loop. The
    /// default forwards to `execute` for strategies (local, rpc) that have
    /// no separate monitor wire contract; `WebhookExecutor` overrides this
    /// to hit the distinct monitor-tick endpoint (spec §4.F).
    async fn execute_monitor(&self, agent: &Agent, want: &Arc<Want>, timeout: Option<Duration>) -> Result<AgentOutcome> {
        self.execute(agent, want, timeout).await
    }
}

/// Build the `Executor` matching an agent's declared execution mode.
/// Webhook/RPC instances are cheap (they just hold a client handle), so a
/// fresh one per call is fine; the local registry is shared.
pub fn executor_for(agent: &Agent, local_registry: &local::LocalRegistry) -> Result<Arc<dyn Executor>> {
    match agent.execution.mode {
        ExecutionMode::Local => Ok(Arc::new(LocalExecutor::new(local_registry.clone()))),
        ExecutionMode::Webhook => {
            let cfg = agent
                .execution
                .webhook
                .clone()
                .ok_or_else(|| EngineError::InvalidConfig(format!("agent '{}' missing webhook config", agent.name)))?;
            Ok(Arc::new(WebhookExecutor::new(cfg)))
        }
        ExecutionMode::Rpc => {
            let cfg = agent
                .execution
                .rpc
                .clone()
                .ok_or_else(|| EngineError::InvalidConfig(format!("agent '{}' missing rpc config", agent.name)))?;
            Ok(Arc::new(RpcExecutor::new(cfg)))
        }
    }
}
