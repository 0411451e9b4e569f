//! Chain builder (spec §4: "the chain builder reconciles by calling
//! Progress() on each runnable Want"): owns the live Want set, resolves
//! `requires` against the agent registry, drives the configured executor,
//! and is the `WantBuilder` collaborator the scheduler Want polls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use want_types::{AgentExecutionStatus, AgentType, Dynamic, MonitorMode, WantStatus};

use crate::error::Result;
use crate::executor::{self, AgentOutcome, LocalRegistry};
use crate::notify::NotificationBus;
use crate::registry::AgentRegistry;
use crate::scheduler_want::{WantBuilder, WantHandle};
use crate::want::Want;

const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

pub struct ChainBuilder {
    wants: tokio::sync::RwLock<HashMap<String, Arc<Want>>>,
    registry: AgentRegistry,
    local_agents: LocalRegistry,
    bus: NotificationBus,
}

impl ChainBuilder {
    pub fn new(registry: AgentRegistry, local_agents: LocalRegistry, bus: NotificationBus) -> Arc<Self> {
        Arc::new(Self {
            wants: tokio::sync::RwLock::new(HashMap::new()),
            registry,
            local_agents,
            bus,
        })
    }

    pub fn local_agents(&self) -> &LocalRegistry {
        &self.local_agents
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Register a new Want with the reconciler and the notification bus.
    /// `want_type` is carried on `WantIdentity` already; submission just
    /// makes the Want visible to `progress_all`/`list_wants`.
    ///
    /// Idempotent on name: re-submitting a Want under a name already live
    /// in this chain (a recipe re-applied with changed parameters) does
    /// not replace the existing object and lose its state/history — it
    /// instead pushes the incoming parameters onto the existing Want via
    /// `update_parameter`, which emits `ParameterChange` and resets any
    /// owned children back to idle to restart under the new values.
    pub async fn submit(&self, want: Arc<Want>) {
        want.attach_bus(self.bus.clone()).await;
        let name = want.name().to_string();

        let existing = self.wants.read().await.get(&name).cloned();
        match existing {
            Some(existing) => {
                for (key, value) in want.snapshot_params().await {
                    existing.update_parameter(key, value).await;
                }
            }
            None => {
                self.bus.register(&want).await;
                self.wants.write().await.insert(name, want);
            }
        }
    }

    /// Run one reconcile pass across every live Want.
    pub async fn progress_all(&self) {
        let wants: Vec<Arc<Want>> = self.wants.read().await.values().cloned().collect();
        for want in wants {
            self.progress(&want).await;
        }
    }

    /// Progress a single Want: resolve its requirements, run the matching
    /// executor, and commit results as one aggregated history entry.
    pub async fn progress(&self, want: &Arc<Want>) {
        let status = want.status().await;
        if matches!(status, WantStatus::Achieved | WantStatus::Terminated | WantStatus::Failed) {
            return;
        }

        want.set_status(WantStatus::Reaching).await;
        want.begin_cycle().await;

        let spec = want.spec().await;
        let mut failure: Option<String> = None;

        for requirement in &spec.requires {
            let candidates = self.registry.find_agents_by_gives(&requirement.0).await;
            let Some(agent) = candidates.first() else {
                failure = Some(format!("no agent provides capability '{}'", requirement.0));
                break;
            };

            match agent.agent_type {
                AgentType::Do => {
                    if let Err(err) = self.run_do_agent(want, agent).await {
                        failure = Some(err.to_string());
                        break;
                    }
                }
                AgentType::Monitor => {
                    if let Err(err) = self.ensure_monitor_agent(want, agent).await {
                        warn!(want = want.name(), agent = %agent.name, error = %err, "failed to start monitor agent");
                    }
                }
            }
        }

        want.end_cycle().await;

        match failure {
            Some(message) => self.on_process_fail(want, &message).await,
            None if want.status().await == WantStatus::Reaching => {
                want.set_status(WantStatus::Achieved).await;
                self.bus.emit_process_end(want, true).await;
            }
            None => {}
        }
    }

    async fn run_do_agent(&self, want: &Arc<Want>, agent: &want_types::Agent) -> Result<()> {
        let executor = executor::executor_for(agent, &self.local_agents)?;
        want.record_agent_start(&agent.name).await;
        self.registry.validate_state_write(&agent.name, "_execute").await;

        let outcome = executor.execute(agent, want, None).await;
        match outcome {
            Ok(outcome) => {
                self.apply_outcome(want, &agent.name, outcome.clone()).await;
                want.record_agent_end(&agent.name, AgentExecutionStatus::Completed, None).await;
                if let Some(err) = outcome.error {
                    return Err(crate::error::EngineError::RemoteFailure(err));
                }
                Ok(())
            }
            Err(err) => {
                want.record_agent_end(&agent.name, AgentExecutionStatus::Failed, Some(err.to_string())).await;
                Err(err)
            }
        }
    }

    async fn apply_outcome(&self, want: &Arc<Want>, agent_name: &str, outcome: AgentOutcome) {
        for (key, value) in outcome.state_updates {
            self.registry.validate_state_write(agent_name, &key).await;
            let previous = want.get_state(&key).await;
            want.store_state(key.clone(), value.clone()).await;
            self.bus.emit_state_change(want, &key, value, previous).await;
        }
    }

    /// Start a periodic (or one-shot) monitor agent if one isn't already
    /// registered for this Want/agent pair.
    async fn ensure_monitor_agent(&self, want: &Arc<Want>, agent: &want_types::Agent) -> Result<()> {
        let agent_id = format!("monitor-{}", agent.name);
        if want.has_background_agent(&agent_id).await {
            return Ok(());
        }

        let (interval, one_shot) = match &agent.execution.webhook {
            Some(cfg) => (
                Duration::from_millis(cfg.monitor_interval_ms),
                cfg.monitor_mode == MonitorMode::OneShot,
            ),
            None => (DEFAULT_MONITOR_INTERVAL, false),
        };

        let token = want.register_background_agent(agent_id.clone()).await?;
        let executor = executor::executor_for(agent, &self.local_agents)?;
        let want_clone = want.clone();
        let bus = self.bus.clone();
        let agent_clone = agent.clone();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            want_clone.record_agent_start(&agent_id).await;
            loop {
                match executor.execute_monitor(&agent_clone, &want_clone, None).await {
                    Ok(outcome) => {
                        if !outcome.state_updates.is_empty() {
                            for (key, value) in &outcome.state_updates {
                                registry.validate_state_write(&agent_clone.name, key).await;
                                let previous = want_clone.get_state(key).await;
                                want_clone.stage_agent_state_change(key.clone(), value.clone()).await;
                                bus.emit_state_change(&want_clone, key, value.clone(), previous).await;
                            }
                            want_clone.dump_state_for_agent(&agent_clone.name).await;
                        }
                    }
                    Err(err) => {
                        warn!(want = want_clone.name(), agent = %agent_clone.name, error = %err, "monitor tick failed");
                    }
                }

                if one_shot {
                    want_clone
                        .record_agent_end(&agent_id, AgentExecutionStatus::Completed, None)
                        .await;
                    return;
                }

                tokio::select! {
                    _ = token.cancelled() => {
                        want_clone
                            .record_agent_end(&agent_id, AgentExecutionStatus::Terminated, None)
                            .await;
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        Ok(())
    }

    async fn on_process_fail(&self, want: &Arc<Want>, message: &str) {
        error!(want = want.name(), error = message, "want failed during progress");
        want.store_state("error", Dynamic::String(message.to_string())).await;
        want.store_state("failure_time", Dynamic::String(Utc::now().to_rfc3339())).await;
        want.set_status(WantStatus::Failed).await;
        want.stop_all_agents().await;
        self.bus.emit_process_end(want, false).await;
    }

    pub async fn want(&self, name: &str) -> Option<Arc<Want>> {
        self.wants.read().await.get(name).cloned()
    }

    pub async fn all_wants(&self) -> Vec<Arc<Want>> {
        self.wants.read().await.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl WantBuilder for ChainBuilder {
    async fn list_wants(&self) -> Vec<WantHandle> {
        self.wants
            .read()
            .await
            .values()
            .map(|want| WantHandle {
                id: want.identity().id.clone(),
                name: want.name().to_string(),
                want_type: want.identity().want_type.clone(),
                want: want.clone(),
            })
            .collect()
    }

    async fn restart_want(&self, name: &str) {
        if let Some(want) = self.wants.read().await.get(name) {
            info!(want = name, "scheduler restarting want");
            want.reset_to_idle_for_restart().await;
        }
    }
}
