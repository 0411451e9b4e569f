//! HTTP+JSON webhook executor (spec §4.F, §6): POSTs the agent-service
//! `execute` contract for DoAgents and the distinct monitor-tick contract
//! for MonitorAgents, mapping responses back to an `AgentOutcome`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use want_types::{Agent, WantIdentity, WebhookConfig};
use want_wire::{ExecuteRequest, ExecuteResponse, ExecuteStatus, MonitorExecuteRequest, MonitorExecuteResponse, WantStateResponse};

use super::{AgentOutcome, Executor};
use crate::error::{EngineError, Result};
use crate::want::Want;

pub struct WebhookExecutor {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookExecutor {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn base_url(&self) -> &str {
        self.config.service_url.trim_end_matches('/')
    }

    /// GET `{serviceURL}/api/v1/wants/{id}/state` first, falling back to the
    /// Want's own current state on failure (spec §4.F
    /// `executeMonitorWithSync`).
    async fn latest_remote_state(&self, want: &Arc<Want>) -> want_types::DynamicMap {
        let url = format!("{}/api/v1/wants/{}/state", self.base_url(), want.identity().id);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => match response.json::<WantStateResponse>().await {
                Ok(body) => return body.state,
                Err(err) => warn!(url, error = %err, "malformed want-state response, falling back to local state"),
            },
            Ok(response) => warn!(url, status = %response.status(), "want-state fetch failed, falling back to local state"),
            Err(err) => warn!(url, error = %err, "want-state fetch failed, falling back to local state"),
        }
        want.snapshot_state().await
    }
}

#[async_trait]
impl Executor for WebhookExecutor {
    async fn execute(&self, agent: &Agent, want: &Arc<Want>, timeout: Option<Duration>) -> Result<AgentOutcome> {
        let state = want.snapshot_state().await;
        let WantIdentity { id: want_id, .. } = want.identity().clone();
        let mut request = ExecuteRequest::new(want_id, agent.name.clone(), state);
        let params = want.snapshot_params().await;
        if !params.is_empty() {
            request.params = Some(params);
        }
        if let Some(callback) = &self.config.callback_url {
            request.callback_url = Some(callback.clone());
        }

        let effective_timeout = timeout.unwrap_or_else(|| Duration::from_millis(self.config.timeout_ms));
        let url = format!("{}/api/v1/agent-service/execute", self.base_url());

        let mut builder = self.client.post(&url).json(&request).timeout(effective_timeout);
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| EngineError::Transport(format!("webhook request to '{url}' failed: {err}")))?;

        // 200 or 202 accepted; any other status is an error containing the
        // body text (spec §6).
        if !(response.status().is_success() || response.status().as_u16() == 202) {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::RemoteFailure(format!(
                "webhook '{url}' returned status {status}: {body}"
            )));
        }

        // Decode failures are logged as warnings but not fatal (spec §4.F):
        // the call succeeded at the transport level, so we surface an
        // empty outcome rather than failing the agent.
        let body: ExecuteResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!(url, error = %err, "malformed webhook execute response, ignoring body");
                return Ok(AgentOutcome::default());
            }
        };

        match body.status {
            ExecuteStatus::Completed | ExecuteStatus::Running => {
                Ok(AgentOutcome::ok(body.state_updates.unwrap_or_default()))
            }
            ExecuteStatus::Failed => Ok(AgentOutcome::failed(
                body.error.unwrap_or_else(|| "agent reported failure".to_string()),
            )),
        }
    }

    /// `executeMonitorWithSync` (spec §4.F): GET the want's latest remote
    /// state, then POST to the monitor-tick endpoint. State updates for
    /// monitors are expected to arrive via the callback channel, not
    /// inline, so a successful tick yields an empty outcome; only a
    /// non-2xx status is an error.
    async fn execute_monitor(&self, agent: &Agent, want: &Arc<Want>, timeout: Option<Duration>) -> Result<AgentOutcome> {
        let latest_state = self.latest_remote_state(want).await;
        let request = MonitorExecuteRequest {
            want_id: want.identity().id.clone(),
            agent_name: agent.name.clone(),
            callback_url: self.config.callback_url.clone(),
            want_state: latest_state,
        };

        let effective_timeout = timeout.unwrap_or_else(|| Duration::from_millis(self.config.timeout_ms));
        let url = format!("{}/api/v1/agent-service/monitor/execute", self.base_url());

        let mut builder = self.client.post(&url).json(&request).timeout(effective_timeout);
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| EngineError::Transport(format!("monitor tick to '{url}' failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(EngineError::RemoteFailure(format!("monitor tick '{url}' returned status {status}")));
        }

        if let Ok(body) = response.json::<MonitorExecuteResponse>().await {
            tracing::debug!(
                want = want.name(),
                agent = %agent.name,
                status = ?body.status,
                state_updates_count = body.state_updates_count,
                "monitor tick acknowledged"
            );
        }

        Ok(AgentOutcome::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use want_types::{Dynamic, MonitorMode, WantIdentity, WantMetadata, WantSpec};

    fn identity(name: &str) -> WantIdentity {
        WantIdentity {
            id: format!("id-{name}"),
            name: name.to_string(),
            want_type: "test".into(),
        }
    }

    fn agent(name: &str, webhook: WebhookConfig) -> Agent {
        Agent {
            name: name.to_string(),
            agent_type: want_types::AgentType::Do,
            capabilities: vec![],
            execution: want_types::ExecutionConfig {
                mode: want_types::ExecutionMode::Webhook,
                webhook: Some(webhook),
                rpc: None,
            },
        }
    }

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn do_agent_applies_state_updates_and_requires_bearer_token() {
        let router = Router::new().route(
            "/api/v1/agent-service/execute",
            post(|headers: axum::http::HeaderMap| async move {
                assert_eq!(headers.get("authorization").unwrap(), "Bearer test-token");
                Json(serde_json::json!({
                    "status": "completed",
                    "state_updates": {"booking_id": "TEST-123", "status": "confirmed"}
                }))
            }),
        );
        let base_url = spawn_server(router).await;

        let config = WebhookConfig {
            service_url: base_url,
            callback_url: None,
            auth_token: Some("test-token".to_string()),
            timeout_ms: 2_000,
            monitor_interval_ms: 30_000,
            monitor_mode: MonitorMode::Periodic,
        };
        let executor = WebhookExecutor::new(config.clone());
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        let outcome = executor.execute(&agent("booker", config), &want, None).await.unwrap();

        assert!(outcome.error.is_none());
        assert_eq!(outcome.state_updates.get("booking_id"), Some(&Dynamic::String("TEST-123".into())));
        assert_eq!(outcome.state_updates.get("status"), Some(&Dynamic::String("confirmed".into())));
    }

    #[tokio::test]
    async fn webhook_timeout_is_surfaced_as_transport_error() {
        let router = Router::new().route(
            "/api/v1/agent-service/execute",
            post(|| async move {
                tokio::time::sleep(Duration::from_millis(2_000)).await;
                Json(serde_json::json!({"status": "completed"}))
            }),
        );
        let base_url = spawn_server(router).await;

        let config = WebhookConfig {
            service_url: base_url,
            callback_url: None,
            auth_token: None,
            timeout_ms: 500,
            monitor_interval_ms: 30_000,
            monitor_mode: MonitorMode::Periodic,
        };
        let executor = WebhookExecutor::new(config.clone());
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        let result = executor.execute(&agent("slow", config), &want, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn monitor_tick_counts_calls_and_does_not_need_inline_state_updates() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let router = Router::new()
            .route(
                "/api/v1/wants/{id}/state",
                get(|| async move {
                    Json(serde_json::json!({
                        "want_id": "id-w", "state": {}, "status": "reaching",
                        "timestamp": chrono::Utc::now()
                    }))
                }),
            )
            .route(
                "/api/v1/agent-service/monitor/execute",
                post(move || {
                    let counter = counter_clone.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(serde_json::json!({"status": "ok", "state_updates_count": 0}))
                    }
                }),
            );
        let base_url = spawn_server(router).await;

        let config = WebhookConfig {
            service_url: base_url,
            callback_url: None,
            auth_token: None,
            timeout_ms: 2_000,
            monitor_interval_ms: 100,
            monitor_mode: MonitorMode::Periodic,
        };
        let executor = WebhookExecutor::new(config.clone());
        let want = Want::new(identity("w"), WantMetadata::default(), WantSpec::default());
        let a = agent("watcher", config);

        executor.execute_monitor(&a, &want, None).await.unwrap();
        executor.execute_monitor(&a, &want, None).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
