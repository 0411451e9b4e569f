//! HTTP+JSON agent-service wire contract (spec §6).

use serde::{Deserialize, Serialize};
use want_types::DynamicMap;

/// POST `{serviceURL}/api/v1/agent-service/execute` — DoAgent sync request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub want_id: String,
    pub agent_name: String,
    pub operation: String,
    pub want_state: DynamicMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<DynamicMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl ExecuteRequest {
    pub fn new(want_id: impl Into<String>, agent_name: impl Into<String>, want_state: DynamicMap) -> Self {
        Self {
            want_id: want_id.into(),
            agent_name: agent_name.into(),
            operation: "execute".to_string(),
            want_state,
            params: None,
            callback_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecuteStatus {
    Completed,
    Failed,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub status: ExecuteStatus,
    #[serde(default)]
    pub state_updates: Option<DynamicMap>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
}

/// POST `{serviceURL}/api/v1/agent-service/monitor/execute` — one tick of a
/// MonitorAgent (one-shot or periodic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorExecuteRequest {
    pub want_id: String,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub want_state: DynamicMap,
}

/// Free-form response; `status`/`state_updates_count` are logged, but actual
/// state updates for monitors arrive out-of-band via the callback channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorExecuteResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub state_updates_count: Option<u64>,
}

/// POST `/monitor/start` — legacy async MonitorAgent start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStartResponse {
    pub monitor_id: String,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// GET `/api/v1/wants/{id}/state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WantStateResponse {
    pub want_id: String,
    pub state: DynamicMap,
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
