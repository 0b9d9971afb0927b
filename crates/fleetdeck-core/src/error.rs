//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Failed to render values: {0}")]
    YamlRender(#[from] serde_yaml::Error),

    #[error("Failed to convert values: {0}")]
    JsonConvert(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a validation error for a named field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error was raised by input validation
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
