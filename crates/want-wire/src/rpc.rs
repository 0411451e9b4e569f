//! Generated protobuf types for the `AgentService` RPC contract (spec §6).
//!
//! State maps are `map<string, string>` on the wire, matching the webhook
//! JSON contract's flattened transport described in spec §4.F.

tonic::include_proto!("agent_service");
