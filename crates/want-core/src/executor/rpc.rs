//! gRPC executor (spec §4.F, §6): calls the generated `AgentService` client
//! and flattens the Want's dynamic state to the wire's `map<string,string>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Channel;
use want_types::{Agent, Dynamic, DynamicMap, RpcConfig};
use want_wire::rpc::{
    agent_service_client::AgentServiceClient, ExecuteRequest as RpcExecuteRequest, MonitorRequest,
};

use super::{AgentOutcome, Executor};
use crate::error::{EngineError, Result};
use crate::want::Want;

pub struct RpcExecutor {
    config: RpcConfig,
}

impl RpcExecutor {
    pub fn new(config: RpcConfig) -> Self {
        Self { config }
    }

    fn endpoint_url(&self) -> String {
        if self.config.use_tls {
            format!("https://{}", self.config.endpoint)
        } else {
            format!("http://{}", self.config.endpoint)
        }
    }

    async fn connect(&self) -> Result<AgentServiceClient<Channel>> {
        let endpoint = self.endpoint_url();
        let channel = tonic::transport::Endpoint::from_shared(endpoint.clone())
            .map_err(|err| EngineError::InvalidConfig(format!("invalid rpc endpoint '{endpoint}': {err}")))?
            .connect()
            .await
            .map_err(|err| EngineError::Transport(format!("rpc connect to '{endpoint}' failed: {err}")))?;
        Ok(AgentServiceClient::new(channel))
    }
}

fn flatten(state: &DynamicMap) -> std::collections::HashMap<String, String> {
    state.iter().map(|(k, v)| (k.clone(), v.to_string())).collect()
}

fn unflatten(state: std::collections::HashMap<String, String>) -> DynamicMap {
    state
        .into_iter()
        .map(|(k, v)| (k, Dynamic::String(v)))
        .collect()
}

#[async_trait]
impl Executor for RpcExecutor {
    async fn execute(&self, agent: &Agent, want: &Arc<Want>, timeout: Option<Duration>) -> Result<AgentOutcome> {
        let endpoint = self.endpoint_url();
        let mut client = self.connect().await?;

        let state = want.snapshot_state().await;
        let request = tonic::Request::new(RpcExecuteRequest {
            want_id: want.identity().id.clone(),
            agent_name: agent.name.clone(),
            want_state: flatten(&state),
        });

        let call = client.execute(request);
        let response = match timeout {
            Some(d) => tokio::time::timeout(d, call)
                .await
                .map_err(|_| EngineError::Transport(format!("rpc call to '{endpoint}' timed out")))??,
            None => call.await?,
        };

        let body = response.into_inner();
        if body.status == "failed" {
            return Ok(AgentOutcome::failed(body.error));
        }
        Ok(AgentOutcome::ok(unflatten(body.state_updates)))
    }

    /// MonitorAgent over RPC: calls `StartMonitor` instead of re-running
    /// `Execute` (spec §4.F: "RPC... MonitorAgent: server returns a
    /// monitor_id"). Unlike the webhook transport, the response carries no
    /// state updates — starting a remote monitor only hands back its id;
    /// any subsequent state comes back out of band, same as a one-shot
    /// webhook monitor's callback.
    async fn execute_monitor(&self, agent: &Agent, want: &Arc<Want>, timeout: Option<Duration>) -> Result<AgentOutcome> {
        let endpoint = self.endpoint_url();
        let mut client = self.connect().await?;

        let state = want.snapshot_state().await;
        let request = tonic::Request::new(MonitorRequest {
            want_id: want.identity().id.clone(),
            agent_name: agent.name.clone(),
            want_state: flatten(&state),
        });

        let call = client.start_monitor(request);
        let response = match timeout {
            Some(d) => tokio::time::timeout(d, call)
                .await
                .map_err(|_| EngineError::Transport(format!("rpc start_monitor to '{endpoint}' timed out")))??,
            None => call.await?,
        };

        let body = response.into_inner();
        if body.status == "failed" {
            return Ok(AgentOutcome::failed(format!(
                "start_monitor failed for agent '{}'",
                agent.name
            )));
        }

        let mut updates = DynamicMap::new();
        updates.insert("monitor_id".to_string(), Dynamic::String(body.monitor_id));
        Ok(AgentOutcome::ok(updates))
    }
}

impl From<tonic::Status> for EngineError {
    fn from(status: tonic::Status) -> Self {
        EngineError::RemoteFailure(status.message().to_string())
    }
}
