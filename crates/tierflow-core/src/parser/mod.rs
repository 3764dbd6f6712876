//! KDL parser
//!
//! Parses TierFlow topology files. Each section has its own module; sections are
//! applied onto the previous value so later files override earlier ones field by field.

mod data;
mod network;
mod tier;
mod value;

use data::apply_data;
use network::apply_network;
use tier::{apply_app, apply_web};
use value::{named_string, opt_string, string_arg, string_map, unknown_key};

use crate::error::{Result, TopologyError};
use crate::model::{Backend, Stage, Topology};
use kdl::{KdlDocument, KdlNode};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Parse a KDL file into a Topology
pub fn parse_kdl_file<P: AsRef<Path>>(path: P) -> Result<Topology> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_kdl_string(&content, name)
}

/// Parse a KDL string
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<Topology> {
    parse_kdl_string_with_stage(content, default_name, None)
}

/// Parse a KDL string for a target stage
///
/// Sections nested in `stage "<target>" { ... }` are applied after the top-level
/// sections; sections in other stages are ignored.
pub fn parse_kdl_string_with_stage(
    content: &str,
    default_name: String,
    target_stage: Option<&str>,
) -> Result<Topology> {
    let doc: KdlDocument = content.parse()?;

    let mut topology = Topology::default();
    topology.settings.project = default_name;
    topology.settings.stage = target_stage.map(|s| s.to_string());

    let mut stage_sections: Vec<KdlNode> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "stage" => {
                let name = opt_string(node).ok_or_else(|| {
                    TopologyError::InvalidConfig("stage requires a name".to_string())
                })?;
                let stage = parse_stage(node)?;
                topology
                    .stages
                    .entry(name.clone())
                    .or_default()
                    .variables
                    .extend(stage.variables);

                if target_stage == Some(name.as_str())
                    && let Some(children) = node.children()
                {
                    stage_sections.extend(
                        children
                            .nodes()
                            .iter()
                            .filter(|n| n.name().value() != "variables")
                            .cloned(),
                    );
                }
            }
            "variables" => {
                topology.variables.extend(string_map(node));
            }
            "include" => {
                debug!("include is resolved by file discovery, skipping node");
            }
            _ => {
                if !apply_section(&mut topology, node)? {
                    debug!(node = %node.name().value(), "Skipping unknown top-level node");
                }
            }
        }
    }

    for node in &stage_sections {
        if !apply_section(&mut topology, node)? {
            return Err(unknown_key("stage", node));
        }
    }

    Ok(topology)
}

/// Apply one top-level section. Returns false for nodes that are not sections.
fn apply_section(topology: &mut Topology, node: &KdlNode) -> Result<bool> {
    match node.name().value() {
        "project" => {
            topology.settings.project = string_arg(node)?;
        }
        "region" => {
            topology.settings.region = string_arg(node)?;
        }
        "tags" => {
            topology.settings.tags.extend(string_map(node));
        }
        "backend" => {
            topology.backend = Some(parse_backend(node)?);
        }
        "network" => apply_network(&mut topology.network, node)?,
        "web" => apply_web(&mut topology.web, node)?,
        "app" => apply_app(&mut topology.app, node)?,
        "data" => apply_data(&mut topology.data, node)?,
        _ => return Ok(false),
    }
    Ok(true)
}

/// stage "name" { variables { ... } }
fn parse_stage(node: &KdlNode) -> Result<Stage> {
    let mut stage = Stage::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "variables" {
                stage.variables.extend(string_map(child));
            }
        }
    }

    Ok(stage)
}

/// backend { bucket "..." key "..." lock-table "..." region "..." }
fn parse_backend(node: &KdlNode) -> Result<Backend> {
    let mut backend = Backend {
        bucket: named_string(node, "bucket").unwrap_or_default(),
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "bucket" => backend.bucket = string_arg(child)?,
                "key" => backend.key = Some(string_arg(child)?),
                "lock-table" | "lock_table" => backend.lock_table = Some(string_arg(child)?),
                "region" => backend.region = Some(string_arg(child)?),
                _ => return Err(unknown_key("backend", child)),
            }
        }
    }

    if backend.bucket.is_empty() {
        return Err(TopologyError::InvalidConfig(
            "backend requires a bucket".to_string(),
        ));
    }

    Ok(backend)
}
