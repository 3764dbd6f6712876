use crate::utils::{self, Project};
use colored::Colorize;

pub fn handle(project: &Project, dot: bool) -> anyhow::Result<()> {
    let (graph, _) = utils::prepare(project)?;

    if dot {
        print!("{}", graph.to_dot()?);
        return Ok(());
    }

    utils::print_header(project);
    println!();
    for address in graph.order()? {
        let dependencies = graph.dependencies_of(&address);
        if dependencies.is_empty() {
            println!("  {}", address.cyan());
        } else {
            println!(
                "  {} {} {}",
                address.cyan(),
                "←".dimmed(),
                dependencies.join(", ").dimmed()
            );
        }
    }
    println!();
    println!("{} resources", graph.len());

    Ok(())
}
