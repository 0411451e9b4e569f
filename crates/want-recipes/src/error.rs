use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecipeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse recipe yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("recipe validation error at {path}: {message}")]
    Validation { path: String, message: String },

    #[error(transparent)]
    Types(#[from] want_types::TypesError),
}

pub type Result<T> = std::result::Result<T, RecipeError>;

impl RecipeError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        RecipeError::Validation {
            path: path.into(),
            message: message.into(),
        }
    }
}
