//! TierFlow core
//!
//! Loads a three-tier topology (network foundation, web, app, data) from KDL files,
//! expands templates and validates the topology contract.

pub mod bootstrap;
pub mod cidr;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod model;
pub mod parser;
pub mod template;
pub mod validate;

pub use cidr::Cidr;
pub use discovery::{DiscoveredFiles, discover_files, discover_files_with_stage, find_project_root};
pub use error::{Result, TopologyError};
pub use loader::{load_project, load_project_from_root, load_project_from_root_with_stage};
pub use model::*;
pub use parser::{parse_kdl_file, parse_kdl_string, parse_kdl_string_with_stage};
pub use template::{TemplateProcessor, Variables, extract_variables, extract_variables_with_stage};
pub use validate::{Issue, Severity, ValidationReport, validate};
