//! Cloud error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Duplicate resource address: {0}")]
    DuplicateResource(String),

    #[error("Unresolved binding: {resource} input '{input}' refers to {target}")]
    UnresolvedBinding {
        resource: String,
        input: String,
        target: String,
    },

    #[error("Dependency cycle between: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("Policy violations:\n{}", .0.join("\n"))]
    PolicyViolation(Vec<String>),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error(transparent)]
    Topology(#[from] tierflow_core::TopologyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Failures worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Throttled(_) | CloudError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
