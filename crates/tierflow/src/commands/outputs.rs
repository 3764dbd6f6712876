use crate::utils::{self, Project};
use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeMap;

pub async fn handle(project: &Project, json: bool) -> anyhow::Result<()> {
    let (_, outputs) = utils::prepare(project)?;
    let engine = utils::engine(project).await?;
    let values = engine.outputs(&outputs).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    utils::print_header(project);
    println!();
    if values.values().all(is_unset) {
        println!(
            "{}",
            "No outputs yet. Run tier apply to create the topology.".yellow()
        );
        return Ok(());
    }
    print_table(&values);
    Ok(())
}

pub fn print_table(values: &BTreeMap<String, Value>) {
    let width = values.keys().map(String::len).max().unwrap_or(0);
    for (name, value) in values {
        let padded = format!("{:width$}", name, width = width);
        println!("  {} = {}", padded.cyan(), render(value));
    }
}

/// True when every leaf of the value is null
fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().all(is_unset),
        Value::Object(map) => map.values().all(is_unset),
        _ => false,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "(not created)".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(render).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{}: {}", k, render(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        other => other.to_string(),
    }
}
