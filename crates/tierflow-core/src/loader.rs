//! Project loader
//!
//! Discovery, variable collection, template expansion, parsing and bootstrap
//! resolution in one call.

use crate::bootstrap;
use crate::discovery::{DiscoveredFiles, discover_files_with_stage, find_project_root};
use crate::error::{Result, TopologyError};
use crate::model::Topology;
use crate::parser::parse_kdl_string_with_stage;
use crate::template::{
    TemplateProcessor, Variables, extract_stage_variables, extract_variables,
};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Load the project containing the current directory
#[instrument]
pub fn load_project() -> Result<Topology> {
    info!("Starting project load");
    let project_root = find_project_root()?;
    load_project_from_root(&project_root)
}

#[instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn load_project_from_root(project_root: &Path) -> Result<Topology> {
    load_project_from_root_with_stage(project_root, None)
}

/// Load a project for a stage
///
/// Files are expanded and concatenated in this order:
/// topology.kdl → tiers/**/*.kdl → topology.{stage}.kdl → topology.local.kdl
#[instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn load_project_from_root_with_stage(
    project_root: &Path,
    stage: Option<&str>,
) -> Result<Topology> {
    debug!("Step 1: Discovering files");
    let discovered = discover_files_with_stage(project_root, stage)?;
    if discovered.root.is_none() {
        return Err(TopologyError::ProjectRootNotFound(project_root.to_path_buf()));
    }

    debug!("Step 2: Preparing template processor");
    let mut processor = prepare_template_processor(&discovered, project_root, stage)?;

    debug!("Step 3: Expanding templates");
    let expanded = expand_all_files(&discovered, &mut processor)?;
    info!(
        content_size = expanded.len(),
        "Template expansion complete"
    );

    debug!("Step 4: Parsing KDL");
    let name = project_root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let mut topology = parse_kdl_string_with_stage(&expanded, name, stage)?;

    if let Some(stage_name) = stage
        && !topology.stages.is_empty()
        && !topology.stages.contains_key(stage_name)
        && discovered.stage_override.is_none()
    {
        return Err(TopologyError::StageNotFound(stage_name.to_string()));
    }

    debug!("Step 5: Resolving bootstrap scripts");
    bootstrap::resolve(&mut topology, project_root)?;

    info!(
        project = %topology.name(),
        zones = topology.network.zones.len(),
        stages = topology.stages.len(),
        "Project loaded successfully"
    );

    Ok(topology)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| TopologyError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Build the template context
///
/// Later sources override earlier ones:
/// .env → .env.{stage} → filtered environment → global variables → stage variables
fn prepare_template_processor(
    discovered: &DiscoveredFiles,
    project_root: &Path,
    stage: Option<&str>,
) -> Result<TemplateProcessor> {
    let mut processor = TemplateProcessor::new();

    processor.add_variable(
        "PROJECT_ROOT",
        serde_json::Value::String(project_root.to_string_lossy().to_string()),
    );
    processor.add_variable(
        "STAGE",
        serde_json::Value::String(stage.unwrap_or_default().to_string()),
    );

    if let Some(env_file) = &discovered.env_file {
        processor.add_env_file_variables(env_file)?;
    }
    if let Some(stage_env_file) = &discovered.stage_env_file {
        processor.add_env_file_variables(stage_env_file)?;
    }

    processor.add_env_variables();

    let mut global_vars = Variables::new();
    let mut stage_vars = Variables::new();
    let sources = discovered
        .root
        .iter()
        .chain(discovered.variables.iter())
        .chain(discovered.stage_override.iter());
    for file in sources {
        let content = read(file)?;
        global_vars.extend(extract_variables(&content)?);
        if let Some(stage_name) = stage {
            stage_vars.extend(extract_stage_variables(&content, stage_name)?);
        }
    }

    debug!(
        global = global_vars.len(),
        stage = stage_vars.len(),
        "Adding collected variables"
    );
    processor.add_variables(global_vars);
    processor.add_variables(stage_vars);

    Ok(processor)
}

fn expand_all_files(
    discovered: &DiscoveredFiles,
    processor: &mut TemplateProcessor,
) -> Result<String> {
    let mut expanded = String::new();

    for file in discovered.topology_files() {
        debug!(file = %file.display(), "Rendering file");
        expanded.push_str(&processor.render_file(file)?);
        expanded.push_str("\n\n");
    }

    Ok(expanded)
}
