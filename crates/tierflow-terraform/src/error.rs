//! Export error types

use thiserror::Error;
use tierflow_cloud::CloudError;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("{resource}: binding to unknown resource '{target}'")]
    UnknownReference { resource: String, target: String },

    #[error("{resource}: missing attribute '{attribute}'")]
    MissingAttribute { resource: String, attribute: String },

    #[error("Duplicate Terraform resource: {0}")]
    DuplicateResource(String),

    #[error("Graph error: {0}")]
    Graph(#[from] CloudError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;
