//! Scheduler Want (spec §4.I): a system Want that scans the builder's live
//! Wants each reconcile pass and starts a polling `SchedulerAgent` for any
//! Want carrying a non-empty `when` clause.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::RwLock;
use tokio::time::Duration as TokioDuration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::schedule;
use crate::want::Want;

/// Identifies a live Want for the scheduler's scan, decoupled from any
/// particular registry implementation.
pub struct WantHandle {
    pub id: String,
    pub name: String,
    pub want_type: String,
    pub want: Arc<Want>,
}

/// The minimal surface the scheduler needs from whatever holds the set of
/// live Wants — a chain/orchestrator builder elsewhere in the engine.
#[async_trait::async_trait]
pub trait WantBuilder: Send + Sync {
    async fn list_wants(&self) -> Vec<WantHandle>;
    async fn restart_want(&self, name: &str);
}

const SCHEDULER_WANT_TYPES: &[&str] = &["target", "custom_target"];

pub struct SchedulerWant<B: WantBuilder> {
    builder: Arc<B>,
    agents: RwLock<HashMap<String, Arc<SchedulerAgent<B>>>>,
}

impl<B: WantBuilder + 'static> SchedulerWant<B> {
    pub fn new(builder: Arc<B>) -> Self {
        Self {
            builder,
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// One reconcile pass: ensure every schedulable Want has a running
    /// `SchedulerAgent`, and replace any whose backing Want was redeployed
    /// (same name, new id).
    pub async fn progress(&self) {
        let wants = self.builder.list_wants().await;
        for handle in wants {
            if SCHEDULER_WANT_TYPES.contains(&handle.want_type.as_str()) {
                continue;
            }
            let spec = handle.want.spec().await;
            let Some(when) = spec.when else { continue };

            let agent_id = format!("scheduler-{}", handle.name);
            let needs_replacement = match self.agents.read().await.get(&handle.name) {
                Some(existing) => existing.want_id != handle.id,
                None => true,
            };
            if !needs_replacement {
                continue;
            }

            if let Some(old) = self.agents.write().await.remove(&handle.name) {
                old.stop().await;
            }

            match handle.want.register_background_agent(agent_id.clone()).await {
                Ok(token) => {
                    let agent = Arc::new(SchedulerAgent::spawn(
                        agent_id,
                        handle.id.clone(),
                        handle.name.clone(),
                        when,
                        handle.want.clone(),
                        self.builder.clone(),
                        token,
                    ));
                    self.agents.write().await.insert(handle.name.clone(), agent);
                }
                Err(err) => {
                    warn!(want = handle.name, error = %err, "failed to register scheduler agent");
                }
            }
        }
    }

    pub async fn stop_all(&self) {
        let mut agents = self.agents.write().await;
        for (_, agent) in agents.drain() {
            agent.stop().await;
        }
    }
}

/// A polling background agent: wakes at the `when` clause's computed next
/// fire time and resets its target Want to idle.
pub struct SchedulerAgent<B: WantBuilder> {
    pub agent_id: String,
    pub want_id: String,
    want_name: String,
    handle: tokio::task::JoinHandle<()>,
    _builder: std::marker::PhantomData<B>,
}

impl<B: WantBuilder + 'static> SchedulerAgent<B> {
    #[allow(clippy::too_many_arguments)]
    fn spawn(
        agent_id: String,
        want_id: String,
        want_name: String,
        when: want_types::WhenSpec,
        target: Arc<Want>,
        builder: Arc<B>,
        token: tokio_util::sync::CancellationToken,
    ) -> Self {
        let task_name = want_name.clone();
        let task_agent_id = agent_id.clone();
        let handle = tokio::spawn(async move {
            loop {
                let now = chrono::Local::now();
                let sleep_for = match schedule::next_execution(&when, now) {
                    Ok(next) => (next - now).to_std().unwrap_or(TokioDuration::from_secs(0)),
                    Err(err) => {
                        warn!(want = task_name, error = %err, "invalid schedule, scheduler agent exiting");
                        return;
                    }
                };

                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(agent = task_agent_id, want = task_name, "scheduler agent cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(sleep_for) => {
                        target.record_agent_start(&task_agent_id).await;
                        builder.restart_want(&task_name).await;
                        target
                            .record_agent_end(&task_agent_id, want_types::AgentExecutionStatus::Completed, None)
                            .await;
                    }
                }
            }
        });

        Self {
            agent_id,
            want_id,
            want_name,
            handle,
            _builder: std::marker::PhantomData,
        }
    }

    pub async fn stop(&self) {
        self.handle.abort();
    }
}

impl<B: WantBuilder> Drop for SchedulerAgent<B> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
