use crate::utils::{self, Project};
use colored::Colorize;

pub async fn handle(project: &Project) -> anyhow::Result<()> {
    let (graph, _) = utils::prepare(project)?;
    let engine = utils::engine(project).await?;
    let plan = engine.plan(&graph).await?;

    utils::print_header(project);
    println!();
    if !plan.has_changes {
        println!("{}", "No changes. Infrastructure matches the topology.".green());
        return Ok(());
    }
    utils::print_plan(&plan);

    Ok(())
}
