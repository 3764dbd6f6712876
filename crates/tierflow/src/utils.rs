use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tierflow_cloud::{
    Engine, Plan, ResourceGraph, RetryConfig, StateManager, TopologyOutputs, synthesize,
};
use tierflow_cloud_local::{LocalProvider, store_path};
use tierflow_config::UserConfig;
use tierflow_core::{Severity, Topology};

/// A loaded project and the operator settings it runs with
pub struct Project {
    pub root: PathBuf,
    pub topology: Topology,
    pub user: UserConfig,
}

impl Project {
    /// Stage the state and the rehearsal store are kept under
    pub fn stage(&self) -> &str {
        self.topology
            .settings
            .stage
            .as_deref()
            .unwrap_or(tierflow_cloud::state::DEFAULT_STAGE)
    }
}

/// Find the project root and load the topology for a stage
///
/// Without an explicit stage the user's `default_stage` is used.
pub fn load_project(stage: Option<String>) -> anyhow::Result<Project> {
    let user = tierflow_config::load_user_config()?;
    let stage = stage.or_else(|| user.default_stage.clone());

    let root = tierflow_core::find_project_root().map_err(|e| {
        anyhow::anyhow!(
            "{}\nRun tier in a directory containing topology.kdl or set TIERFLOW_PROJECT_ROOT",
            e
        )
    })?;

    let mut topology = tierflow_core::load_project_from_root_with_stage(&root, stage.as_deref())?;
    topology.settings.merge_default_tags(&user.default_tags);
    tracing::debug!(
        project = %topology.name(),
        stage = ?topology.settings.stage,
        "Loaded project"
    );

    Ok(Project {
        root,
        topology,
        user,
    })
}

/// Validate the topology, print warnings and build its resource graph
pub fn prepare(project: &Project) -> anyhow::Result<(ResourceGraph, TopologyOutputs)> {
    let report = tierflow_core::validate(&project.topology);
    for issue in report.warnings() {
        eprintln!("{} {}", "warning:".yellow().bold(), issue);
    }
    report.into_result()?;
    Ok(synthesize(&project.topology)?)
}

/// Engine backed by the local rehearsal provider
pub async fn engine(project: &Project) -> anyhow::Result<Engine> {
    let stage = project.stage();
    let provider = LocalProvider::open(
        store_path(&project.root, stage),
        project.topology.settings.region.clone(),
    )
    .await?;
    let state = StateManager::new(&project.root, Some(stage))
        .with_lock_timeout(project.user.lock_timeout_minutes)?;

    Ok(Engine::new(Box::new(provider), state).with_retry(retry_config(&project.user)))
}

pub fn retry_config(user: &UserConfig) -> RetryConfig {
    RetryConfig {
        max_attempts: user.retry.max_attempts,
        initial_delay: Duration::from_millis(user.retry.initial_delay_ms),
        max_delay: Duration::from_millis(user.retry.max_delay_ms),
        ..RetryConfig::default()
    }
}

/// Project, region and stage header
pub fn print_header(project: &Project) {
    let settings = &project.topology.settings;
    println!(
        "Project: {}  Region: {}  Stage: {}",
        settings.project.cyan(),
        settings.region.cyan(),
        project.stage().cyan()
    );
}

/// Plan actions, one per line, followed by the summary
pub fn print_plan(plan: &Plan) {
    for action in plan.changes() {
        let line = format!("  {} {}", action.action_type.symbol(), action.description());
        let line = match action.action_type {
            tierflow_cloud::ActionType::Create => line.green(),
            tierflow_cloud::ActionType::Update => line.yellow(),
            tierflow_cloud::ActionType::Delete => line.red(),
            tierflow_cloud::ActionType::NoOp => line.normal(),
        };
        println!("{}", line);
    }
    println!();
    println!("Plan: {}", plan.summary().to_string().bold());
}

/// Ask for a yes/no answer on stdin; anything but "y" declines
pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

pub fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_from_user_settings() {
        let mut user = UserConfig::default();
        user.retry.max_attempts = 5;
        user.retry.initial_delay_ms = 200;
        user.retry.max_delay_ms = 1000;

        let retry = retry_config(&user);
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for(5), Duration::from_millis(1000));
    }

    #[test]
    fn test_stage_falls_back_to_default() {
        let project = Project {
            root: PathBuf::from("/tmp/shop"),
            topology: Topology::default(),
            user: UserConfig::default(),
        };
        assert_eq!(project.stage(), "default");
    }
}
