use thiserror::Error;

/// Shared error taxonomy for the want-types data model (spec §7:
/// validation failures are reported synchronously and refused).
#[derive(Error, Debug)]
pub enum TypesError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("owner reference cycle detected: {0}")]
    OwnerCycle(String),
}

pub type Result<T> = std::result::Result<T, TypesError>;
