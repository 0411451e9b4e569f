use thiserror::Error;

/// Engine-runtime error taxonomy (spec §7). Validation errors are refused
/// synchronously; transport errors surface as agent-execution failure and
/// are left to the reconciler to retry on the next pass.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid schedule expression: {0}")]
    InvalidSchedule(String),

    #[error("invalid order key: {0}")]
    InvalidOrderKey(String),

    #[error("agent not found for capability: {0}")]
    AgentNotFound(String),

    #[error("duplicate background agent id: {0}")]
    DuplicateAgent(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote agent failure: {0}")]
    RemoteFailure(String),

    #[error("notification buffer full")]
    NotificationBufferFull,

    #[error("agent panicked: {0}")]
    Panic(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
