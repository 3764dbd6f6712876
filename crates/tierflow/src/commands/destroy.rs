use crate::utils::{self, Project};
use colored::Colorize;
use tierflow_cloud::destroy_plan;

pub async fn handle(project: &Project, yes: bool) -> anyhow::Result<()> {
    let engine = utils::engine(project).await?;
    let state = engine.load_state().await?;

    utils::print_header(project);
    println!();
    if state.resources.is_empty() {
        println!("{}", "Nothing to destroy.".green());
        return Ok(());
    }

    let plan = destroy_plan(&state);
    utils::print_plan(&plan);
    println!();

    if !yes {
        println!(
            "{}",
            "Warning: every resource of this stage will be deleted.".red().bold()
        );
        if !utils::confirm("Destroy?")? {
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(());
        }
    }

    println!("{}", "Destroying...".yellow());
    let result = engine.destroy().await?;
    super::apply::print_result(&result);
    if !result.is_success() {
        anyhow::bail!("destroy stopped; run destroy again to resume");
    }

    println!();
    println!("{}", "✓ Destroy complete".green().bold());
    Ok(())
}
