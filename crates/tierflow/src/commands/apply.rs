use crate::utils::{self, Project};
use colored::Colorize;
use tierflow_cloud::ApplyResult;

pub async fn handle(project: &Project, yes: bool) -> anyhow::Result<()> {
    let (graph, outputs) = utils::prepare(project)?;
    let engine = utils::engine(project).await?;
    let plan = engine.plan(&graph).await?;

    utils::print_header(project);
    println!();
    if !plan.has_changes {
        println!("{}", "No changes. Infrastructure matches the topology.".green());
        return Ok(());
    }
    utils::print_plan(&plan);
    println!();

    if !yes && !utils::confirm("Apply these changes?")? {
        println!("{}", "Apply cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Applying...".blue());
    let result = engine.apply(&graph, &plan).await?;
    print_result(&result);
    if !result.is_success() {
        anyhow::bail!(
            "apply stopped after {} of {} changes; run apply again to resume",
            result.succeeded.len(),
            plan.changes().count()
        );
    }

    println!();
    println!("{}", "✓ Apply complete".green().bold());
    let values = engine.outputs(&outputs).await?;
    println!();
    println!("Outputs:");
    super::outputs::print_table(&values);

    Ok(())
}

pub fn print_result(result: &ApplyResult) {
    for action in &result.succeeded {
        println!("  {} {}: {}", "✓".green(), action.address, action.message);
    }
    for action in &result.failed {
        println!(
            "  {} {}: {}",
            "✗".red(),
            action.address,
            action.error.as_deref().unwrap_or("failed")
        );
    }
    for address in &result.skipped {
        println!("  {} {} (skipped)", "-".dimmed(), address.dimmed());
    }
    println!(
        "{} succeeded, {} failed, {} skipped in {} ms",
        result.succeeded.len(),
        result.failed.len(),
        result.skipped.len(),
        result.duration_ms
    );
}
