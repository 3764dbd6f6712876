//! File discovery
//!
//! Finds the KDL files of a project from its conventional directory layout.

use crate::error::{Result, TopologyError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Project directory holding state and optional configuration files
pub const PROJECT_DIR: &str = ".tierflow";
/// Root topology file
pub const ROOT_FILE: &str = "topology.kdl";

/// Discovered project files
#[derive(Debug, Clone, Default)]
pub struct DiscoveredFiles {
    /// Root file (topology.kdl)
    pub root: Option<PathBuf>,
    /// Tier definition files (tiers/**/*.kdl)
    pub tiers: Vec<PathBuf>,
    /// Variable files (variables/**/*.kdl)
    pub variables: Vec<PathBuf>,
    /// Stage override (topology.{stage}.kdl)
    pub stage_override: Option<PathBuf>,
    /// Local override (topology.local.kdl)
    pub local_override: Option<PathBuf>,
    /// Environment file (.env)
    pub env_file: Option<PathBuf>,
    /// Stage environment file (.env.{stage})
    pub stage_env_file: Option<PathBuf>,
}

impl DiscoveredFiles {
    /// Files whose content is concatenated into the topology, in load order
    pub fn topology_files(&self) -> Vec<&Path> {
        let mut files: Vec<&Path> = Vec::new();
        files.extend(self.root.as_deref());
        files.extend(self.tiers.iter().map(|p| p.as_path()));
        files.extend(self.stage_override.as_deref());
        files.extend(self.local_override.as_deref());
        files
    }
}

/// Locate the project root
///
/// Search order:
/// 1. `TIERFLOW_PROJECT_ROOT`
/// 2. the current directory and its parents, looking for `topology.kdl` or
///    `.tierflow/topology.kdl`
#[tracing::instrument]
pub fn find_project_root() -> Result<PathBuf> {
    if let Ok(root) = std::env::var("TIERFLOW_PROJECT_ROOT") {
        let path = PathBuf::from(&root);
        debug!(env_root = %root, "Checking TIERFLOW_PROJECT_ROOT");
        if is_project_root(&path) {
            info!(project_root = %path.display(), "Found project root from environment variable");
            return Ok(path);
        }
        warn!(env_root = %root, "TIERFLOW_PROJECT_ROOT does not contain topology.kdl");
    }

    let start_dir = std::env::current_dir()?;
    find_project_root_from(&start_dir)
}

/// Walk up from `start_dir` looking for a project root
pub fn find_project_root_from(start_dir: &Path) -> Result<PathBuf> {
    let mut current = start_dir.to_path_buf();
    debug!(start_dir = %start_dir.display(), "Searching for project root");

    loop {
        if is_project_root(&current) {
            info!(project_root = %current.display(), "Found project root");
            return Ok(current);
        }

        if !current.pop() {
            break;
        }
    }

    warn!(start_dir = %start_dir.display(), "Project root not found");
    Err(TopologyError::ProjectRootNotFound(start_dir.to_path_buf()))
}

fn is_project_root(dir: &Path) -> bool {
    dir.join(ROOT_FILE).exists() || dir.join(PROJECT_DIR).join(ROOT_FILE).exists()
}

/// `<root>/<name>` if it exists, otherwise `<root>/.tierflow/<name>`
fn first_existing(project_root: &Path, name: &str) -> Option<PathBuf> {
    let direct = project_root.join(name);
    if direct.exists() {
        return Some(direct);
    }
    let nested = project_root.join(PROJECT_DIR).join(name);
    nested.exists().then_some(nested)
}

/// Discover the files of a project
#[tracing::instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn discover_files(project_root: &Path) -> Result<DiscoveredFiles> {
    discover_files_with_stage(project_root, None)
}

/// Discover the files of a project for a stage
///
/// With a stage, `topology.{stage}.kdl` and `.env.{stage}` are picked up as well.
#[tracing::instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn discover_files_with_stage(
    project_root: &Path,
    stage: Option<&str>,
) -> Result<DiscoveredFiles> {
    debug!("Starting file discovery");
    let mut discovered = DiscoveredFiles {
        root: first_existing(project_root, ROOT_FILE),
        ..Default::default()
    };

    let tiers_dir = project_root.join("tiers");
    if tiers_dir.is_dir() {
        discovered.tiers = discover_kdl_files(&tiers_dir)?;
        info!(tier_file_count = discovered.tiers.len(), "Discovered tier files");
    }

    let variables_dir = project_root.join("variables");
    if variables_dir.is_dir() {
        discovered.variables = discover_kdl_files(&variables_dir)?;
        info!(
            variable_count = discovered.variables.len(),
            "Discovered variable files"
        );
    }

    if let Some(stage_name) = stage {
        discovered.stage_override =
            first_existing(project_root, &format!("topology.{}.kdl", stage_name));
        if let Some(file) = &discovered.stage_override {
            debug!(file = %file.display(), stage = %stage_name, "Found stage override file");
        }

        discovered.stage_env_file = first_existing(project_root, &format!(".env.{}", stage_name));
    }

    discovered.local_override = first_existing(project_root, "topology.local.kdl");

    discovered.env_file = first_existing(project_root, ".env");
    if let Some(file) = &discovered.env_file {
        debug!(file = %file.display(), "Found .env file");
    }

    Ok(discovered)
}

/// Recursively collect `.kdl` files below `dir`, sorted alphabetically
fn discover_kdl_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut visited = HashSet::new();

    visit_dir(dir, &mut files, &mut visited)?;

    files.sort();

    Ok(files)
}

fn visit_dir(dir: &Path, files: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    let canonical_dir = dir.canonicalize().map_err(|e| TopologyError::DiscoveryError {
        path: dir.to_path_buf(),
        message: format!("failed to canonicalize path: {}", e),
    })?;

    // symlink loop
    if !visited.insert(canonical_dir.clone()) {
        warn!(dir = %canonical_dir.display(), "Symlink loop detected, skipping");
        return Ok(());
    }

    let entries = std::fs::read_dir(dir).map_err(|e| TopologyError::DiscoveryError {
        path: dir.to_path_buf(),
        message: format!("failed to read directory: {}", e),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| TopologyError::DiscoveryError {
            path: dir.to_path_buf(),
            message: format!("failed to read directory entry: {}", e),
        })?;
        let path = entry.path();

        if path.is_dir() {
            visit_dir(&path, files, visited)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("kdl") {
            files.push(path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn create_test_project(base: &Path) -> Result<()> {
        fs::write(base.join("topology.kdl"), "// root")?;

        fs::create_dir_all(base.join("tiers/data"))?;
        fs::write(base.join("tiers/web.kdl"), "web {}")?;
        fs::write(base.join("tiers/app.kdl"), "app {}")?;
        fs::write(base.join("tiers/data/postgres.kdl"), "data {}")?;

        fs::create_dir_all(base.join("variables"))?;
        fs::write(base.join("variables/common.kdl"), "variables {}")?;

        fs::write(base.join("topology.local.kdl"), "// local override")?;
        fs::write(base.join("topology.prod.kdl"), "// prod override")?;
        fs::write(base.join(".env"), "A=1")?;
        fs::write(base.join(".env.prod"), "A=2")?;

        Ok(())
    }

    #[test]
    fn test_discover_files() -> Result<()> {
        let temp_dir = tempfile::tempdir().unwrap();
        let project_root = temp_dir.path();
        create_test_project(project_root)?;

        let discovered = discover_files(project_root)?;

        assert!(discovered.root.is_some());
        assert_eq!(discovered.tiers.len(), 3);
        assert!(discovered.tiers[0].ends_with("tiers/app.kdl"));
        assert!(discovered.tiers[1].ends_with("tiers/data/postgres.kdl"));
        assert!(discovered.tiers[2].ends_with("tiers/web.kdl"));
        assert_eq!(discovered.variables.len(), 1);
        assert!(discovered.local_override.is_some());
        assert!(discovered.env_file.is_some());
        // no stage requested
        assert!(discovered.stage_override.is_none());
        assert!(discovered.stage_env_file.is_none());

        Ok(())
    }

    #[test]
    fn test_discover_files_with_stage() -> Result<()> {
        let temp_dir = tempfile::tempdir().unwrap();
        let project_root = temp_dir.path();
        create_test_project(project_root)?;

        let discovered = discover_files_with_stage(project_root, Some("prod"))?;
        assert!(
            discovered
                .stage_override
                .as_ref()
                .unwrap()
                .ends_with("topology.prod.kdl")
        );
        assert!(discovered.stage_env_file.as_ref().unwrap().ends_with(".env.prod"));

        let order = discovered.topology_files();
        assert!(order.first().unwrap().ends_with("topology.kdl"));
        assert!(order.last().unwrap().ends_with("topology.local.kdl"));
        assert!(order[order.len() - 2].ends_with("topology.prod.kdl"));

        Ok(())
    }

    #[test]
    fn test_discover_files_minimal() -> Result<()> {
        let temp_dir = tempfile::tempdir().unwrap();
        let project_root = temp_dir.path();
        fs::write(project_root.join("topology.kdl"), "// root")?;

        let discovered = discover_files(project_root)?;

        assert!(discovered.root.is_some());
        assert!(discovered.tiers.is_empty());
        assert!(discovered.variables.is_empty());
        assert!(discovered.local_override.is_none());
        assert!(discovered.env_file.is_none());

        Ok(())
    }

    #[test]
    fn test_root_file_priority_over_project_dir() -> Result<()> {
        let temp_dir = tempfile::tempdir().unwrap();
        let project_root = temp_dir.path();

        fs::write(project_root.join("topology.kdl"), "// root")?;
        fs::create_dir_all(project_root.join(".tierflow"))?;
        fs::write(project_root.join(".tierflow/topology.kdl"), "// nested")?;

        let discovered = discover_files(project_root)?;
        let root = discovered.root.unwrap();
        assert!(!root.to_string_lossy().contains(".tierflow"));

        Ok(())
    }

    #[test]
    fn test_find_project_root_from_subdirectory() -> Result<()> {
        let temp_dir = tempfile::tempdir().unwrap();
        let project_root = temp_dir.path();
        fs::create_dir_all(project_root.join(".tierflow"))?;
        fs::write(project_root.join(".tierflow/topology.kdl"), "// root")?;
        fs::create_dir_all(project_root.join("scripts/nested"))?;

        let found = find_project_root_from(&project_root.join("scripts/nested"))?;
        assert_eq!(found, project_root.to_path_buf());

        Ok(())
    }

    #[test]
    fn test_find_project_root_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = find_project_root_from(temp_dir.path());
        assert!(matches!(result, Err(TopologyError::ProjectRootNotFound(_))));
    }
}
