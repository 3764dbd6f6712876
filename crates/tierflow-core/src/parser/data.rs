//! Parsing of the data section

use super::value::{bool_arg, int_arg, named_int, named_string, string_arg, unknown_key};
use crate::error::{Result, TopologyError};
use crate::model::{DataTierSpec, DbEngine};
use kdl::KdlNode;

/// Apply a `data { ... }` node onto an existing spec
pub fn apply_data(spec: &mut DataTierSpec, node: &KdlNode) -> Result<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "engine" => {
                // engine "postgres" version="16"
                spec.engine = string_arg(child)?
                    .parse::<DbEngine>()
                    .map_err(TopologyError::InvalidConfig)?;
                if let Some(version) = named_string(child, "version") {
                    spec.engine_version = Some(version);
                }
            }
            "version" | "engine-version" => {
                spec.engine_version = Some(string_arg(child)?);
            }
            "class" | "instance-class" => {
                spec.class = string_arg(child)?;
            }
            "port" => {
                spec.port = Some(int_arg(child, 0)?);
            }
            "multi-zone" | "multi_zone" | "multi-az" => {
                spec.multi_zone = bool_arg(child)?;
            }
            "storage" => {
                // storage 20 max=100
                spec.storage_gb = int_arg(child, 0)?;
                if let Some(max) = named_int(child, "max")? {
                    spec.max_storage_gb = Some(max);
                }
            }
            "backup-retention" | "backup_retention" => {
                spec.backup_retention_days = int_arg(child, 0)?;
            }
            "deletion-protection" | "deletion_protection" => {
                spec.deletion_protection = bool_arg(child)?;
            }
            "database" | "db-name" => {
                spec.database_name = Some(string_arg(child)?);
            }
            _ => return Err(unknown_key("data", child)),
        }
    }

    Ok(())
}
