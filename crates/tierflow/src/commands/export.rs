use crate::utils::{self, Project};
use colored::Colorize;
use std::path::Path;

pub fn handle(project: &Project, out: &Path) -> anyhow::Result<()> {
    let (graph, outputs) = utils::prepare(project)?;
    tierflow_cloud::policy::check(&graph).into_result()?;

    let document = tierflow_terraform::render(&project.topology, &graph, &outputs)?;
    let path = tierflow_terraform::write(out, &document)?;

    utils::print_header(project);
    println!(
        "{} {} ({} graph resources)",
        "✓ Wrote".green().bold(),
        path.display().to_string().cyan(),
        graph.len()
    );
    Ok(())
}
