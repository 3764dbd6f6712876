use crate::utils::{self, Project};
use colored::Colorize;
use tierflow_cloud::{ResourceKind, policy, synthesize};
use tierflow_core::Tier;

pub fn handle(project: &Project) -> anyhow::Result<()> {
    println!("{}", "Validating topology...".blue());
    println!(
        "Project root: {}",
        project.root.display().to_string().cyan()
    );
    utils::print_header(project);

    let topology = &project.topology;
    let report = tierflow_core::validate(topology);
    if !report.issues.is_empty() {
        println!();
        for issue in &report.issues {
            println!("  {} {}", utils::severity_label(issue.severity), issue);
        }
    }
    if report.has_errors() {
        eprintln!();
        eprintln!("{}", "✗ Topology is invalid".red().bold());
        std::process::exit(1);
    }

    let (graph, _) = match synthesize(topology) {
        Ok(synthesized) => synthesized,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Could not build the resource graph".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    let policy = policy::check(&graph);
    if !policy.is_clean() {
        eprintln!();
        eprintln!("{}", "✗ Isolation policy violated".red().bold());
        for violation in &policy.violations {
            eprintln!("  {}", violation);
        }
        std::process::exit(1);
    }

    println!();
    println!("{}", "✓ Topology is valid".green().bold());
    println!();
    println!("Summary:");
    println!(
        "  Network: {} across {} zones ({})",
        topology
            .network
            .cidr
            .map(|c| c.to_string())
            .unwrap_or_default()
            .cyan(),
        topology.network.zones.len(),
        topology.network.zone_names().join(", ")
    );
    let ports: Vec<String> = topology.web.ports.iter().map(u16::to_string).collect();
    println!(
        "  Web:  ports {} → instances :{} ({} instances)",
        ports.join(", ").cyan(),
        topology.web.target_port,
        topology.web.fleet.desired
    );
    println!(
        "  App:  port {} ({} instances)",
        topology.app.port.to_string().cyan(),
        topology.app.fleet.desired
    );
    println!(
        "  Data: {} on port {}{}",
        topology.data.engine.to_string().cyan(),
        topology.data.effective_port(),
        if topology.data.multi_zone {
            ", multi-zone"
        } else {
            ""
        }
    );

    println!("  Resources: {}", graph.len());
    for tier in [Tier::Network, Tier::Web, Tier::App, Tier::Data] {
        let count = graph.iter().filter(|r| r.tier == tier).count();
        println!("    - {}: {}", tier.as_str().cyan(), count);
    }
    let rules = graph.by_kind(ResourceKind::SecurityGroupRule).count();
    println!("  Security group rules: {}", rules);

    Ok(())
}
