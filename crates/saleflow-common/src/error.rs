//! Error types shared across saleflow crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Environment variable {name}={value:?} is invalid: {reason}")]
    InvalidEnvVar {
        name: String,
        value: String,
        reason: String,
    },
}

impl CommonError {
    pub fn invalid_env(
        name: impl Into<String>,
        value: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
