use thiserror::Error;

use crate::security::SecurityError;

pub const INVALID_INPUT: &str = "Validation failed, entered data is incorrect";

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Blocked(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn invalid_input() -> Self {
        Self::Validation(INVALID_INPUT.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn blocked() -> Self {
        Self::Blocked("Action not allowed between these users".to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
