//! Rehearsal provider error types

use std::path::PathBuf;
use thiserror::Error;
use tierflow_cloud::CloudError;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("{resource}: {field} refers to unknown resource '{value}'")]
    UnknownReference {
        resource: String,
        field: String,
        value: String,
    },

    #[error("{id} is still in use by {}", .users.join(", "))]
    InUse { id: String, users: Vec<String> },

    #[error("{resource}: missing field '{field}'")]
    MissingField { resource: String, field: String },

    #[error("{id} is a {actual}, not a {expected}")]
    KindMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Injected failure: {0}")]
    Injected(String),

    #[error("Store file error: {path}\nreason: {message}")]
    Store { path: PathBuf, message: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<LocalError> for CloudError {
    fn from(e: LocalError) -> Self {
        match e {
            LocalError::ResourceNotFound(id) => CloudError::ResourceNotFound(id),
            LocalError::MissingField { .. } | LocalError::UnknownReference { .. } => {
                CloudError::InvalidConfig(e.to_string())
            }
            LocalError::Store { .. } => CloudError::StateError(e.to_string()),
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocalError>;
