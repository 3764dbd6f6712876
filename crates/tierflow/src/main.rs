mod commands;
mod utils;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tier")]
#[command(about = "Describe a three-tier network once, check it, plan it, apply it.", long_about = None)]
struct Cli {
    /// Debug logging on stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Stage selection shared by every project command
#[derive(Args, Debug, Clone, Default)]
pub struct StageArgs {
    /// Stage name (dev, stg, prod)
    pub stage: Option<String>,
    /// Stage name (-s/--stage flag, TIERFLOW_STAGE environment variable)
    #[arg(short = 's', long = "stage", env = "TIERFLOW_STAGE", hide = true)]
    pub stage_flag: Option<String>,
}

impl StageArgs {
    /// Positional argument first, then the flag or environment
    pub fn resolve(self) -> Option<String> {
        self.stage.or(self.stage_flag)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check the topology contract and the isolation policy
    Validate {
        #[command(flatten)]
        stage: StageArgs,
    },
    /// Show resources in creation order with their dependencies
    Graph {
        #[command(flatten)]
        stage: StageArgs,
        /// Print Graphviz dot instead of a list
        #[arg(long)]
        dot: bool,
    },
    /// Show what apply would change
    Plan {
        #[command(flatten)]
        stage: StageArgs,
    },
    /// Create or update resources to match the topology
    Apply {
        #[command(flatten)]
        stage: StageArgs,
        /// Apply without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete every resource recorded for the stage
    Destroy {
        #[command(flatten)]
        stage: StageArgs,
        /// Destroy without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the output surface from recorded state
    Outputs {
        #[command(flatten)]
        stage: StageArgs,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a Terraform main.tf.json for the topology
    Export {
        #[command(flatten)]
        stage: StageArgs,
        /// Output directory
        #[arg(short, long, default_value = "terraform")]
        out: PathBuf,
    },
    /// Show version information
    Version,
}

fn init_tracing(verbose: bool) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new("warn"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Version => {
            println!("tierflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Validate { stage } => {
            let project = utils::load_project(stage.resolve())?;
            commands::validate::handle(&project)?;
        }
        Commands::Graph { stage, dot } => {
            let project = utils::load_project(stage.resolve())?;
            commands::graph::handle(&project, dot)?;
        }
        Commands::Plan { stage } => {
            let project = utils::load_project(stage.resolve())?;
            commands::plan::handle(&project).await?;
        }
        Commands::Apply { stage, yes } => {
            let project = utils::load_project(stage.resolve())?;
            commands::apply::handle(&project, yes).await?;
        }
        Commands::Destroy { stage, yes } => {
            let project = utils::load_project(stage.resolve())?;
            commands::destroy::handle(&project, yes).await?;
        }
        Commands::Outputs { stage, json } => {
            let project = utils::load_project(stage.resolve())?;
            commands::outputs::handle(&project, json).await?;
        }
        Commands::Export { stage, out } => {
            let project = utils::load_project(stage.resolve())?;
            commands::export::handle(&project, &out)?;
        }
    }

    Ok(())
}
