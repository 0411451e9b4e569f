//! Want data model (spec §3): identity, metadata, spec, status, and history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dynamic::{Dynamic, DynamicMap};

/// `Status` a Want can occupy during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WantStatus {
    Idle,
    Reaching,
    Achieved,
    Failed,
    Terminated,
}

impl Default for WantStatus {
    fn default() -> Self {
        WantStatus::Idle
    }
}

impl WantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WantStatus::Idle => "idle",
            WantStatus::Reaching => "reaching",
            WantStatus::Achieved => "achieved",
            WantStatus::Failed => "failed",
            WantStatus::Terminated => "terminated",
        }
    }
}

/// An owner back-reference from a child Want to its controlling parent.
/// Exactly one owner reference on a Want may have `controller = true`, and
/// owner references must never form a cycle (checked by
/// `graph::validate_single_controller` and `graph::validate_no_owner_cycles`,
/// not by this type alone).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub controller: bool,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

impl OwnerReference {
    pub fn controller(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: "mywant/v1".to_string(),
            kind: kind.into(),
            name: name.into(),
            controller: true,
            block_owner_deletion: true,
        }
    }
}

/// Metadata common to every Want: identity, labels, owner references, and
/// the fractional order key used to place it among its siblings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WantMetadata {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub order_key: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_poll_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl WantMetadata {
    /// The metadata fields exempt from the "did state actually change"
    /// differential check (spec §3 invariants — `updated_at`,
    /// `last_poll_time`, `status_changed_*`).
    pub fn is_metadata_key(key: &str) -> bool {
        matches!(key, "updated_at" | "last_poll_time")
            || key.starts_with("status_changed_")
            || key.ends_with("_status")
    }

    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|o| o.controller)
    }
}

/// A single entry of an ordered label-selector used by `using`.
pub type Selector = BTreeMap<String, String>;

/// A capability or `gives` identifier a Want requires an agent to satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement(pub String);

/// A filter describing which state keys (and optional conditions) a Want
/// wants notified about on a peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSubscription {
    pub want_name: String,
    #[serde(default)]
    pub state_keys: Vec<String>,
    #[serde(default)]
    pub conditions: BTreeMap<String, Dynamic>,
}

/// "every N unit" / "at HH:MM" schedule spec (parsed by `want-core::schedule`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhenSpec {
    pub every: String,
    #[serde(default)]
    pub at: Option<String>,
}

/// The desired-state spec portion of a Want.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WantSpec {
    #[serde(default)]
    pub params: DynamicMap,
    #[serde(default)]
    pub using: Vec<Selector>,
    #[serde(default)]
    pub requires: Vec<Requirement>,
    #[serde(default)]
    pub state_subscriptions: Vec<StateSubscription>,
    #[serde(default)]
    pub notification_filters: Vec<String>,
    #[serde(default)]
    pub when: Option<WhenSpec>,
}

/// One state-history snapshot: the full (differential-checked) state map at
/// a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub want_name: String,
    pub state_value: DynamicMap,
    pub timestamp: DateTime<Utc>,
}

/// One parameter-history entry: the full set of parameters changed in a
/// single batch (one progress cycle, or one off-cycle `UpdateParameter`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterHistoryEntry {
    pub changes: DynamicMap,
    pub timestamp: DateTime<Utc>,
}

/// Outcome + bookkeeping for one agent invocation, referenced by
/// `StopAllAgents`/`OnProcessFail` (spec §4.D, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentExecutionStatus {
    Running,
    Completed,
    Failed,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionRecord {
    pub agent_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: AgentExecutionStatus,
    pub error: Option<String>,
}

impl AgentExecutionRecord {
    pub fn started(agent_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            agent_name: agent_name.into(),
            started_at: now,
            ended_at: None,
            status: AgentExecutionStatus::Running,
            error: None,
        }
    }
}

/// History container bounded per spec §3 (state ≤100, params ≤50).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WantHistory {
    pub state: Vec<StateHistoryEntry>,
    pub parameters: Vec<ParameterHistoryEntry>,
    pub agent_executions: Vec<AgentExecutionRecord>,
}

pub const MAX_STATE_HISTORY: usize = 100;
pub const MAX_PARAMETER_HISTORY: usize = 50;

impl WantHistory {
    pub fn push_state(&mut self, entry: StateHistoryEntry) {
        self.state.push(entry);
        while self.state.len() > MAX_STATE_HISTORY {
            self.state.remove(0);
        }
    }

    pub fn push_parameters(&mut self, entry: ParameterHistoryEntry) {
        self.parameters.push(entry);
        while self.parameters.len() > MAX_PARAMETER_HISTORY {
            self.parameters.remove(0);
        }
    }
}

/// Identity triple: a Want is identified by (id, name, type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantIdentity {
    pub id: String,
    pub name: String,
    pub want_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub gives: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Do,
    Monitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Local,
    Webhook,
    Rpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorMode {
    OneShot,
    Periodic,
}

impl Default for MonitorMode {
    fn default() -> Self {
        MonitorMode::Periodic
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub service_url: String,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    #[serde(default)]
    pub monitor_mode: MonitorMode,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_monitor_interval_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcProtocol {
    Grpc,
    Jsonrpc,
}

impl Default for RpcProtocol {
    fn default() -> Self {
        RpcProtocol::Grpc
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub endpoint: String,
    #[serde(default)]
    pub protocol: RpcProtocol,
    #[serde(default)]
    pub use_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub rpc: Option<RpcConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub allowed_state_keys: Vec<String>,
    #[serde(default)]
    pub key_descriptions: BTreeMap<String, String>,
}
