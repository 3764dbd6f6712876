//! Terraform export
//!
//! Renders a synthesized topology as a `main.tf.json` document, so the graph
//! TierFlow rehearses locally can be provisioned with Terraform.
//!
//! ```ignore
//! let (graph, outputs) = tierflow_cloud::synthesize(&topology)?;
//! let document = tierflow_terraform::render(&topology, &graph, &outputs)?;
//! tierflow_terraform::write("terraform", &document)?;
//! ```

pub mod error;
pub mod resources;

pub use error::{ExportError, Result};
pub use resources::{aws_type, terraform_name};

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tierflow_cloud::{OutputBinding, ResourceGraph, TopologyOutputs};
use tierflow_core::Topology;
use tracing::{debug, info};

/// File name of the exported document
pub const MAIN_FILE: &str = "main.tf.json";

const TERRAFORM_VERSION: &str = ">= 1.5.0";
const AWS_PROVIDER_VERSION: &str = "~> 5.0";

/// Resource blocks keyed by Terraform type, then name
#[derive(Debug, Default)]
pub struct Document {
    resources: BTreeMap<&'static str, Map<String, Value>>,
}

impl Document {
    pub fn add(&mut self, resource_type: &'static str, name: &str, body: Value) -> Result<()> {
        let blocks = self.resources.entry(resource_type).or_default();
        if blocks.contains_key(name) {
            return Err(ExportError::DuplicateResource(format!(
                "{}.{}",
                resource_type, name
            )));
        }
        blocks.insert(name.to_string(), body);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.resources.values().map(Map::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_value(self) -> Value {
        Value::Object(
            self.resources
                .into_iter()
                .map(|(kind, blocks)| (kind.to_string(), Value::Object(blocks)))
                .collect(),
        )
    }
}

/// Render the `main.tf.json` document for a synthesized topology
#[tracing::instrument(skip_all, fields(project = %topology.name()))]
pub fn render(
    topology: &Topology,
    graph: &ResourceGraph,
    outputs: &TopologyOutputs,
) -> Result<Value> {
    graph.resolve()?;

    let ctx = resources::Context::new(graph, &topology.settings.region);
    let mut document = Document::default();
    for resource in graph.iter() {
        resources::convert(&ctx, resource, &mut document)?;
    }
    info!(
        nodes = graph.len(),
        resources = document.len(),
        "Rendered Terraform document"
    );

    let mut output = Map::new();
    for surface in outputs.surface() {
        let value = match &surface.binding {
            OutputBinding::One(r) => json!(ctx.interpolate(r)?),
            OutputBinding::List(refs) => json!(
                refs.iter()
                    .map(|r| ctx.interpolate(r))
                    .collect::<Result<Vec<_>>>()?
            ),
            OutputBinding::Map(refs) => {
                let mut by_zone = Map::new();
                for (zone, r) in refs {
                    by_zone.insert(zone.clone(), json!(ctx.interpolate(r)?));
                }
                Value::Object(by_zone)
            }
        };
        output.insert(
            surface.name.to_string(),
            json!({ "description": surface.description, "value": value }),
        );
    }

    Ok(json!({
        "terraform": terraform_block(topology),
        "provider": { "aws": provider_block(topology) },
        "resource": document.into_value(),
        "output": output,
    }))
}

fn terraform_block(topology: &Topology) -> Value {
    let mut block = json!({
        "required_version": TERRAFORM_VERSION,
        "required_providers": {
            "aws": { "source": "hashicorp/aws", "version": AWS_PROVIDER_VERSION }
        },
    });

    if let Some(backend) = &topology.backend {
        let settings = &topology.settings;
        let key = backend
            .key
            .clone()
            .unwrap_or_else(|| format!("{}/terraform.tfstate", settings.prefix()));
        let mut s3 = json!({
            "bucket": backend.bucket,
            "key": key,
            "region": backend.region.as_deref().unwrap_or(&settings.region),
            "encrypt": true,
        });
        if let Some(table) = &backend.lock_table {
            s3["dynamodb_table"] = json!(table);
        }
        block["backend"] = json!({ "s3": s3 });
    }

    block
}

fn provider_block(topology: &Topology) -> Value {
    let settings = &topology.settings;
    let mut tags = settings.tags.clone();
    tags.insert("Project".to_string(), settings.project.clone());
    if let Some(stage) = &settings.stage {
        tags.insert("Stage".to_string(), stage.clone());
    }
    tags.insert("ManagedBy".to_string(), "tierflow".to_string());

    json!({
        "region": settings.region,
        "default_tags": [{ "tags": tags }],
    })
}

/// Write the document to `dir/main.tf.json`, creating `dir` when needed
pub fn write(dir: impl AsRef<Path>, document: &Value) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let path = dir.join(MAIN_FILE);
    let mut content = serde_json::to_string_pretty(document)?;
    content.push('\n');
    std::fs::write(&path, content)?;
    debug!(path = %path.display(), "Wrote Terraform document");
    Ok(path)
}
