use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("File read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error: {path}\nreason: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid CIDR block '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("Template error: {file}\nreason: {message}")]
    TemplateError {
        file: PathBuf,
        line: Option<usize>,
        message: String,
    },

    #[error("Template render error: {0}")]
    TemplateRenderError(String),

    #[error("Discovery error: {path}\nreason: {message}")]
    DiscoveryError { path: PathBuf, message: String },

    #[error(
        "Project root not found\nsearched from: {0}\nhint: run inside a directory containing topology.kdl"
    )]
    ProjectRootNotFound(PathBuf),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Bootstrap script not found: {0}")]
    BootstrapNotFound(String),

    #[error("Topology validation failed:\n{}", .0.join("\n"))]
    Validation(Vec<String>),
}

pub type Result<T> = std::result::Result<T, TopologyError>;
