//! The Want object (spec §4.D): desired-state spec, live state, bounded
//! history, and the reentrant progress-cycle that batches state writes into
//! a single differential commit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::trace;
use want_types::{
    render_eq, AgentExecutionRecord, AgentExecutionStatus, Dynamic, DynamicMap,
    ParameterHistoryEntry, StateHistoryEntry, WantHistory, WantIdentity, WantMetadata, WantSpec,
    WantStatus,
};

use crate::error::{EngineError, Result};
use crate::notifiable::NotifiableBase;
use crate::notify::{NotificationBus, StateNotification};

/// Staged writes for one progress cycle. A cycle may nest (an agent that
/// itself drives sub-reconciliation) so `depth` tracks how many `begin`
/// calls are outstanding; only the outermost `end` commits.
#[derive(Default)]
struct CycleState {
    depth: u32,
    pending_state: DynamicMap,
    pending_params: DynamicMap,
}

/// State keys that are operational bookkeeping, not reconciled desired
/// state: excluded from the snapshot used for history differencing (spec
/// §4.D) even though they live in the same state map.
const OPERATIONAL_STATE_KEYS: &[&str] = &["current_agent", "running_agents"];

pub struct Want {
    identity: WantIdentity,
    metadata: RwLock<WantMetadata>,
    spec: RwLock<WantSpec>,
    status: RwLock<WantStatus>,
    state: RwLock<DynamicMap>,
    history: Mutex<WantHistory>,
    cycle: Mutex<CycleState>,
    /// Guards the full read-merge-write sequence of `merge_state` so two
    /// concurrent callers merging disjoint submaps under the same top-level
    /// key both survive (spec §8 scenario E) instead of racing on separate
    /// lock acquisitions.
    merge_lock: Mutex<()>,
    notifiable: NotifiableBase,
    /// Background agents (periodic monitors, the scheduler's polling agent)
    /// registered against this Want by id, so `StopAgent`/`StopAllAgents`
    /// can cancel them individually or in bulk (spec §5).
    background_agents: Mutex<HashMap<String, CancellationToken>>,
    /// Staged state writes from concurrently running background agents,
    /// separate from the progress-cycle buffer because multiple monitors
    /// may write at once (spec §4.D "agent-state channel"). Drained by
    /// `dump_state_for_agent`, which applies it to `state` directly and
    /// leaves history recording to the next progress cycle's commit.
    pending_agent_state: Mutex<DynamicMap>,
    /// The process-wide notification bus, attached once a Want joins a
    /// `ChainBuilder` (spec §4.D: `SetStatus`/`UpdateParameter` "always
    /// emit" their change notification). `None` until then, so a freshly
    /// constructed Want used in isolation (as most unit tests do) is still
    /// usable without one.
    bus: RwLock<Option<NotificationBus>>,
}

impl Want {
    pub fn new(identity: WantIdentity, metadata: WantMetadata, spec: WantSpec) -> Arc<Self> {
        Self::with_notifiable(identity, metadata, spec, NotifiableBase::new)
    }

    /// A Want whose inbox is sized for `MonitorWant`'s wider alert buffer
    /// (spec §4.J: "200 for monitors").
    pub fn new_monitor(identity: WantIdentity, metadata: WantMetadata, spec: WantSpec) -> Arc<Self> {
        Self::with_notifiable(identity, metadata, spec, NotifiableBase::for_monitor)
    }

    fn with_notifiable(
        identity: WantIdentity,
        metadata: WantMetadata,
        spec: WantSpec,
        build_notifiable: impl FnOnce(Vec<want_types::StateSubscription>) -> NotifiableBase,
    ) -> Arc<Self> {
        let subscriptions = spec.state_subscriptions.clone();
        Arc::new(Self {
            identity,
            metadata: RwLock::new(metadata),
            spec: RwLock::new(spec),
            status: RwLock::new(WantStatus::Idle),
            state: RwLock::new(DynamicMap::new()),
            history: Mutex::new(WantHistory::default()),
            cycle: Mutex::new(CycleState::default()),
            merge_lock: Mutex::new(()),
            notifiable: build_notifiable(subscriptions),
            background_agents: Mutex::new(HashMap::new()),
            pending_agent_state: Mutex::new(DynamicMap::new()),
            bus: RwLock::new(None),
        })
    }

    /// Attach the notification bus so `set_status`/`update_parameter`
    /// emit their change notifications instead of only updating local
    /// state. Called once by `ChainBuilder::submit`.
    pub async fn attach_bus(&self, bus: NotificationBus) {
        *self.bus.write().await = Some(bus);
    }

    /// Register a background agent's cancellation token under `agent_id`.
    /// Duplicate ids are rejected (spec §5: "duplicate-id registration is
    /// rejected with a clear error").
    pub async fn register_background_agent(&self, agent_id: impl Into<String>) -> Result<CancellationToken> {
        let agent_id = agent_id.into();
        let mut agents = self.background_agents.lock().await;
        if agents.contains_key(&agent_id) {
            return Err(EngineError::DuplicateAgent(agent_id));
        }
        let token = CancellationToken::new();
        agents.insert(agent_id, token.clone());
        Ok(token)
    }

    pub async fn unregister_background_agent(&self, agent_id: &str) {
        self.background_agents.lock().await.remove(agent_id);
    }

    pub async fn has_background_agent(&self, agent_id: &str) -> bool {
        self.background_agents.lock().await.contains_key(agent_id)
    }

    /// Cancel and unregister one background agent by id.
    pub async fn stop_agent(&self, agent_id: &str) {
        if let Some(token) = self.background_agents.lock().await.remove(agent_id) {
            token.cancel();
        }
    }

    /// Cancel every background agent registered on this Want.
    pub async fn stop_all_agents(&self) {
        let mut agents = self.background_agents.lock().await;
        for (_, token) in agents.drain() {
            token.cancel();
        }
        drop(agents);
        self.mark_all_running_terminated().await;
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn identity(&self) -> &WantIdentity {
        &self.identity
    }

    pub async fn status(&self) -> WantStatus {
        *self.status.read().await
    }

    pub async fn set_status(&self, status: WantStatus) {
        let mut guard = self.status.write().await;
        if *guard != status {
            let previous = *guard;
            *guard = status;
            drop(guard);
            let mut meta = self.metadata.write().await;
            meta.status_changed_at = Some(Utc::now());
            drop(meta);

            if let Some(bus) = self.bus.read().await.as_ref() {
                bus.emit_status_change(
                    &self.identity.name,
                    Dynamic::String(status.as_str().to_string()),
                    Dynamic::String(previous.as_str().to_string()),
                )
                .await;
            }
        }
    }

    pub async fn order_key(&self) -> String {
        self.metadata.read().await.order_key.clone()
    }

    pub async fn controller_owner_names(&self) -> Vec<String> {
        self.metadata
            .read()
            .await
            .owner_references
            .iter()
            .filter(|o| o.controller)
            .map(|o| o.name.clone())
            .collect()
    }

    pub async fn is_controlled_by(&self, owner_name: &str) -> bool {
        self.metadata
            .read()
            .await
            .owner_references
            .iter()
            .any(|o| o.controller && o.name == owner_name)
    }

    pub async fn subscribes_to(&self, source: &str, key: &str) -> bool {
        self.notifiable.subscribes_to(source, key)
    }

    /// Inbound delivery from the notification bus: buffered, drained by the
    /// owning reconciler loop on its next tick.
    pub async fn on_state_update(&self, note: StateNotification) -> Result<()> {
        self.notifiable.push(note).await
    }

    pub async fn drain_inbox(&self) -> Vec<StateNotification> {
        self.notifiable.drain().await
    }

    #[doc(hidden)]
    pub async fn drain_notifications_for_test(&self) -> Vec<StateNotification> {
        self.drain_inbox().await
    }

    /// A parameter change on a controlling owner resets a child back to
    /// `Idle` so the next reconcile pass picks up the new parameters (spec
    /// §4.H).
    pub async fn reset_to_idle_for_restart(&self) {
        self.set_status(WantStatus::Idle).await;
    }

    // -- progress cycle ---------------------------------------------------

    /// Begin a progress cycle. Reentrant: nested calls only increment depth.
    pub async fn begin_cycle(&self) {
        let mut cycle = self.cycle.lock().await;
        cycle.depth += 1;
    }

    /// End a progress cycle. Only the outermost call (depth reaches 0)
    /// commits staged state/parameter writes as a single differential batch
    /// into `state`/`history`, so nested agent-driven sub-cycles don't
    /// produce a flood of intermediate history entries.
    pub async fn end_cycle(&self) {
        let mut cycle = self.cycle.lock().await;
        if cycle.depth == 0 {
            return;
        }
        cycle.depth -= 1;
        if cycle.depth > 0 {
            return;
        }

        let pending_state = std::mem::take(&mut cycle.pending_state);
        let pending_params = std::mem::take(&mut cycle.pending_params);
        drop(cycle);

        if !pending_state.is_empty() {
            self.commit_state_batch(pending_state).await;
        }
        if !pending_params.is_empty() {
            self.commit_parameter_batch(pending_params).await;
        }
    }

    async fn commit_state_batch(&self, batch: DynamicMap) {
        {
            let mut state = self.state.write().await;
            for (key, value) in batch {
                state.insert(key, value);
            }
        }
        self.reconcile_history().await;
    }

    /// A snapshot of `state` omitting operational bookkeeping keys (spec
    /// §3: "State keys `current_agent` and `running_agents`... are
    /// excluded from state-history snapshots").
    fn history_snapshot_of(state: &DynamicMap) -> DynamicMap {
        state
            .iter()
            .filter(|(k, _)| !OPERATIONAL_STATE_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Keys that differ (added, removed, or changed by render-equality)
    /// between two history snapshots.
    fn diff_keys(a: &DynamicMap, b: &DynamicMap) -> Vec<String> {
        let mut keys: std::collections::BTreeSet<&String> = a.keys().collect();
        keys.extend(b.keys());
        keys.into_iter()
            .filter(|k| match (a.get(*k), b.get(*k)) {
                (Some(x), Some(y)) => !render_eq(x, y),
                (None, None) => false,
                _ => true,
            })
            .cloned()
            .collect()
    }

    /// The state-history aggregation algorithm (spec §4.D, "the hardest
    /// algorithm"): take the current snapshot, compare it against the last
    /// history entry. Equal -> no-op. Differs only in status-like/metadata
    /// keys -> mutate the last entry's snapshot in place and bump its
    /// timestamp. Otherwise append a brand-new entry with the full
    /// snapshot, trimmed to `MAX_STATE_HISTORY`.
    async fn reconcile_history(&self) {
        let snapshot = {
            let state = self.state.read().await;
            Self::history_snapshot_of(&state)
        };
        let mut history = self.history.lock().await;
        let now = Utc::now();

        let Some(last) = history.state.last_mut() else {
            history.push_state(StateHistoryEntry {
                want_name: self.identity.name.clone(),
                state_value: snapshot,
                timestamp: now,
            });
            return;
        };

        let diffs = Self::diff_keys(&last.state_value, &snapshot);
        if diffs.is_empty() {
            return;
        }

        if diffs.iter().all(|k| WantMetadata::is_metadata_key(k)) {
            for key in diffs {
                match snapshot.get(&key) {
                    Some(value) => {
                        last.state_value.insert(key, value.clone());
                    }
                    None => {
                        last.state_value.remove(&key);
                    }
                }
            }
            last.timestamp = now;
        } else {
            history.push_state(StateHistoryEntry {
                want_name: self.identity.name.clone(),
                state_value: snapshot,
                timestamp: now,
            });
        }
    }

    async fn commit_parameter_batch(&self, batch: DynamicMap) {
        {
            let mut spec = self.spec.write().await;
            for (key, value) in &batch {
                spec.params.insert(key.clone(), value.clone());
            }
        }
        {
            let mut history = self.history.lock().await;
            history.push_parameters(ParameterHistoryEntry {
                changes: batch.clone(),
                timestamp: Utc::now(),
            });
        }

        if let Some(bus) = self.bus.read().await.as_ref() {
            bus.emit_parameter_change(&self.identity.name, &batch).await;
        }
    }

    /// Stage a state write. Inside a cycle, accumulates into the pending
    /// batch. Outside a cycle, this is a legitimate one-off path (spec §4.D
    /// design notes) that still must stage-then-commit to reuse the same
    /// differential decision, so it wraps itself in a one-shot cycle.
    pub async fn store_state(&self, key: impl Into<String>, value: Dynamic) {
        let key = key.into();
        let mut cycle = self.cycle.lock().await;
        if cycle.depth > 0 {
            cycle.pending_state.insert(key, value);
            return;
        }
        drop(cycle);
        self.begin_cycle().await;
        {
            let mut cycle = self.cycle.lock().await;
            cycle.pending_state.insert(key, value);
        }
        self.end_cycle().await;
    }

    /// Deep-merge `incoming` into the existing value at `key`, safe under
    /// concurrent callers merging disjoint submaps (spec §8 scenario E).
    /// Unlike `store_state`, this bypasses the cycle batch entirely and
    /// commits immediately under `merge_lock`, since two callers racing to
    /// read-modify-write the same top-level key must serialize the whole
    /// sequence, not just the final insert.
    pub async fn merge_state(&self, key: &str, incoming: Dynamic) {
        let _guard = self.merge_lock.lock().await;
        {
            let mut state = self.state.write().await;
            let base = state.entry(key.to_string()).or_insert(Dynamic::Map(Default::default()));
            want_types::deep_merge(base, &incoming);
        }
        self.reconcile_history().await;
    }

    /// Stage a state write from a concurrently running background agent
    /// (e.g. a monitor tick), separate from the progress-cycle buffer
    /// because several monitors may call this at once (spec §4.D).
    pub async fn stage_agent_state_change(&self, key: impl Into<String>, value: Dynamic) {
        self.pending_agent_state.lock().await.insert(key.into(), value);
    }

    /// Apply everything staged by background agents for `agent_name` to
    /// `state`, record it as the last agent to touch state, and leave
    /// history recording to the next progress cycle's commit so both paths
    /// flow through the same aggregation algorithm.
    pub async fn dump_state_for_agent(&self, agent_name: &str) {
        let batch = {
            let mut pending = self.pending_agent_state.lock().await;
            if pending.is_empty() {
                return;
            }
            std::mem::take(&mut *pending)
        };
        let mut state = self.state.write().await;
        for (key, value) in batch {
            state.insert(key, value);
        }
        state.insert("action_by_agent".to_string(), Dynamic::String(agent_name.to_string()));
    }

    pub async fn update_parameter(&self, key: impl Into<String>, value: Dynamic) {
        let key = key.into();
        let mut cycle = self.cycle.lock().await;
        if cycle.depth > 0 {
            cycle.pending_params.insert(key, value);
            return;
        }
        drop(cycle);
        let mut batch = DynamicMap::new();
        batch.insert(key, value);
        self.commit_parameter_batch(batch).await;
    }

    pub async fn get_state(&self, key: &str) -> Option<Dynamic> {
        self.state.read().await.get(key).cloned()
    }

    pub async fn get_state_int(&self, key: &str, default: i64) -> i64 {
        match self.get_state(key).await {
            Some(v) => want_types::as_int_with_default(&v, default),
            None => default,
        }
    }

    pub async fn get_state_float(&self, key: &str, default: f64) -> f64 {
        match self.get_state(key).await {
            Some(v) => want_types::as_float_with_default(&v, default),
            None => default,
        }
    }

    pub async fn get_state_string(&self, key: &str, default: &str) -> String {
        match self.get_state(key).await {
            Some(v) => want_types::as_string_with_default(&v, default),
            None => default.to_string(),
        }
    }

    pub async fn get_state_bool(&self, key: &str, default: bool) -> bool {
        match self.get_state(key).await {
            Some(v) => want_types::as_bool_with_default(&v, default),
            None => default,
        }
    }

    pub async fn get_parameter(&self, key: &str) -> Option<Dynamic> {
        self.spec.read().await.params.get(key).cloned()
    }

    pub async fn snapshot_state(&self) -> DynamicMap {
        self.state.read().await.clone()
    }

    pub async fn snapshot_params(&self) -> DynamicMap {
        self.spec.read().await.params.clone()
    }

    pub async fn spec(&self) -> WantSpec {
        self.spec.read().await.clone()
    }

    pub async fn metadata(&self) -> WantMetadata {
        self.metadata.read().await.clone()
    }

    pub async fn set_order_key(&self, key: String) {
        self.metadata.write().await.order_key = key;
    }

    // -- agent execution bookkeeping --------------------------------------

    pub async fn record_agent_start(&self, agent_name: &str) {
        let mut history = self.history.lock().await;
        history
            .agent_executions
            .push(AgentExecutionRecord::started(agent_name, Utc::now()));
        trace!(want = self.identity.name, agent = agent_name, "agent execution started");
    }

    pub async fn record_agent_end(&self, agent_name: &str, status: AgentExecutionStatus, error: Option<String>) {
        let mut history = self.history.lock().await;
        if let Some(record) = history
            .agent_executions
            .iter_mut()
            .rev()
            .find(|r| r.agent_name == agent_name && r.status == AgentExecutionStatus::Running)
        {
            record.status = status;
            record.error = error;
            record.ended_at = Some(Utc::now());
        }
    }

    pub async fn history_snapshot(&self) -> WantHistory {
        self.history.lock().await.clone()
    }

    /// Running agent names, used by `StopAllAgents`/`OnProcessFail` (spec
    /// §7) to know which in-flight executions must be cancelled.
    pub async fn running_agents(&self) -> Vec<String> {
        self.history
            .lock()
            .await
            .agent_executions
            .iter()
            .filter(|r| r.status == AgentExecutionStatus::Running)
            .map(|r| r.agent_name.clone())
            .collect()
    }

    pub async fn mark_all_running_terminated(&self) {
        let mut history = self.history.lock().await;
        for record in history.agent_executions.iter_mut() {
            if record.status == AgentExecutionStatus::Running {
                record.status = AgentExecutionStatus::Terminated;
                record.ended_at = Some(Utc::now());
            }
        }
    }
}

impl std::fmt::Debug for Want {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Want").field("name", &self.identity.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> WantIdentity {
        WantIdentity {
            id: format!("id-{name}"),
            name: name.to_string(),
            want_type: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn store_state_outside_cycle_commits_immediately() {
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        want.store_state("booking_id", Dynamic::String("abc".into())).await;
        assert_eq!(
            want.get_state("booking_id").await,
            Some(Dynamic::String("abc".into()))
        );
        let history = want.history_snapshot().await;
        assert_eq!(history.state.len(), 1);
    }

    #[tokio::test]
    async fn unchanged_numeric_round_trip_does_not_add_history_entry() {
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        want.store_state("count", Dynamic::Int(1)).await;
        want.store_state("count", Dynamic::Float(1.0)).await;
        let history = want.history_snapshot().await;
        assert_eq!(history.state.len(), 1, "re-storing an equal value must not grow history");
    }

    #[tokio::test]
    async fn nested_cycle_commits_only_once_at_outer_end() {
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        want.begin_cycle().await;
        want.store_state("a", Dynamic::Int(1)).await;
        want.begin_cycle().await;
        want.store_state("b", Dynamic::Int(2)).await;
        want.end_cycle().await; // inner end: no commit yet
        assert!(want.get_state("a").await.is_none());
        want.end_cycle().await; // outer end: commits batch
        assert_eq!(want.get_state("a").await, Some(Dynamic::Int(1)));
        assert_eq!(want.get_state("b").await, Some(Dynamic::Int(2)));
        let history = want.history_snapshot().await;
        assert_eq!(history.state.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_merge_state_preserves_both_disjoint_submaps() {
        let want = Arc::new(Want::new(identity("w"), WantMetadata::default(), WantSpec::default()));
        let want_a = want.clone();
        let want_b = want.clone();

        let first: Dynamic = serde_json::from_str(r#"{"0": {"Evidence": "a"}}"#).unwrap();
        let second: Dynamic = serde_json::from_str(r#"{"1": {"Description": "b"}}"#).unwrap();

        let (r1, r2) = tokio::join!(
            async move { want_a.merge_state("data_by_channel", first).await },
            async move { want_b.merge_state("data_by_channel", second).await }
        );
        let _ = (r1, r2);

        let (channels, ok) = want_types::as_map(&want.get_state("data_by_channel").await.unwrap());
        assert!(ok);
        assert!(channels.contains_key("0"));
        assert!(channels.contains_key("1"));
    }

    #[tokio::test]
    async fn parameter_update_is_recorded_in_history() {
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        want.update_parameter("threshold", Dynamic::Int(5)).await;
        assert_eq!(want.get_parameter("threshold").await, Some(Dynamic::Int(5)));
        let history = want.history_snapshot().await;
        assert_eq!(history.parameters.len(), 1);
    }

    #[tokio::test]
    async fn set_status_emits_status_change_on_attached_bus_only_when_different() {
        let bus = NotificationBus::new();
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        want.attach_bus(bus.clone()).await;

        want.set_status(WantStatus::Idle).await; // no-op: already Idle
        want.set_status(WantStatus::Reaching).await;

        let recent = bus.recent(10).await;
        assert_eq!(recent.len(), 1, "only the actual transition should emit");
        assert_eq!(recent[0].kind, crate::notify::NotificationKind::StatusChange);
        assert_eq!(recent[0].value, Dynamic::String("reaching".to_string()));
    }

    #[tokio::test]
    async fn update_parameter_emits_parameter_change_on_attached_bus() {
        let bus = NotificationBus::new();
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        want.attach_bus(bus.clone()).await;

        want.update_parameter("threshold", Dynamic::Int(5)).await;

        let recent = bus.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, crate::notify::NotificationKind::ParameterChange);
        assert_eq!(recent[0].key, "threshold");
    }

    #[tokio::test]
    async fn parameter_change_on_owner_resets_child_to_idle() {
        let bus = NotificationBus::new();
        let parent = Want::new(identity("parent"), WantMetadata::default(), WantSpec::default());
        parent.attach_bus(bus.clone()).await;

        let mut child_metadata = WantMetadata::default();
        child_metadata.owner_references.push(want_types::OwnerReference::controller("Want", "parent"));
        let child = Want::new(identity("child"), child_metadata, WantSpec::default());
        child.attach_bus(bus.clone()).await;
        child.set_status(WantStatus::Achieved).await;
        bus.register(&parent).await;
        bus.register(&child).await;

        parent.update_parameter("threshold", Dynamic::Int(2)).await;

        assert_eq!(child.status().await, WantStatus::Idle);
    }
}
