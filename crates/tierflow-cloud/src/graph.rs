//! Resource graph
//!
//! Typed resource nodes with output→input bindings. Edges point from the
//! resource producing an output to the resource consuming it, so a topological
//! order is a valid creation order.

use crate::error::{CloudError, Result};
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use tierflow_core::Tier;

/// Kind of cloud resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Subnet,
    InternetGateway,
    NatGateway,
    RouteTable,
    SecurityGroup,
    SecurityGroupRule,
    LoadBalancer,
    TargetGroup,
    Listener,
    LaunchTemplate,
    AutoScalingGroup,
    DbSubnetGroup,
    Database,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 14] = [
        ResourceKind::Network,
        ResourceKind::Subnet,
        ResourceKind::InternetGateway,
        ResourceKind::NatGateway,
        ResourceKind::RouteTable,
        ResourceKind::SecurityGroup,
        ResourceKind::SecurityGroupRule,
        ResourceKind::LoadBalancer,
        ResourceKind::TargetGroup,
        ResourceKind::Listener,
        ResourceKind::LaunchTemplate,
        ResourceKind::AutoScalingGroup,
        ResourceKind::DbSubnetGroup,
        ResourceKind::Database,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet-gateway",
            ResourceKind::NatGateway => "nat-gateway",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::SecurityGroupRule => "security-group-rule",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::TargetGroup => "target-group",
            ResourceKind::Listener => "listener",
            ResourceKind::LaunchTemplate => "launch-template",
            ResourceKind::AutoScalingGroup => "auto-scaling-group",
            ResourceKind::DbSubnetGroup => "db-subnet-group",
            ResourceKind::Database => "database",
        }
    }

    /// Outputs a resource of this kind publishes once it exists
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Network => &["id", "cidr"],
            ResourceKind::Subnet => &["id", "cidr", "zone"],
            ResourceKind::InternetGateway => &["id"],
            ResourceKind::NatGateway => &["id", "public_ip"],
            ResourceKind::RouteTable => &["id"],
            ResourceKind::SecurityGroup => &["id"],
            ResourceKind::SecurityGroupRule => &["id"],
            ResourceKind::LoadBalancer => &["id", "arn", "dns_name"],
            ResourceKind::TargetGroup => &["id", "arn"],
            ResourceKind::Listener => &["id", "arn"],
            ResourceKind::LaunchTemplate => &["id", "latest_version"],
            ResourceKind::AutoScalingGroup => &["id", "name", "instances"],
            ResourceKind::DbSubnetGroup => &["id", "name"],
            ResourceKind::Database => &["id", "endpoint", "address", "port"],
        }
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs().contains(&name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CloudError::InvalidConfig(format!("unknown resource kind '{}'", s)))
    }
}

/// A reference to one output of another resource (`subnet.public-a.id`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    /// Address of the producing resource
    pub resource: String,
    pub output: String,
}

impl OutputRef {
    pub fn new(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.output)
    }
}

/// Value of an input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input {
    One(OutputRef),
    Many(Vec<OutputRef>),
}

impl Input {
    pub fn refs(&self) -> &[OutputRef] {
        match self {
            Input::One(r) => std::slice::from_ref(r),
            Input::Many(refs) => refs,
        }
    }
}

/// One node of the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub address: String,
    pub kind: ResourceKind,
    /// Logical name, unique within its kind
    pub name: String,
    pub tier: Tier,
    /// Literal attributes
    pub spec: serde_json::Map<String, serde_json::Value>,
    /// Attributes taken from other resources' outputs
    pub inputs: BTreeMap<String, Input>,
    /// Ordering-only dependencies (addresses)
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(kind: ResourceKind, name: impl Into<String>, tier: Tier) -> Self {
        let name = name.into();
        Self {
            address: format!("{}.{}", kind, name),
            kind,
            name,
            tier,
            spec: serde_json::Map::new(),
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with(mut self, key: &str, value: serde_json::Value) -> Self {
        self.spec.insert(key.to_string(), value);
        self
    }

    pub fn bind(mut self, key: &str, source: OutputRef) -> Self {
        self.inputs.insert(key.to_string(), Input::One(source));
        self
    }

    pub fn bind_all(mut self, key: &str, sources: Vec<OutputRef>) -> Self {
        self.inputs.insert(key.to_string(), Input::Many(sources));
        self
    }

    pub fn after(mut self, address: impl Into<String>) -> Self {
        self.depends_on.push(address.into());
        self
    }

    /// Reference to one of this resource's outputs
    pub fn output(&self, name: &str) -> OutputRef {
        OutputRef::new(self.address.clone(), name)
    }

    /// Addresses this resource depends on, without duplicates
    pub fn dependencies(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.inputs
            .values()
            .flat_map(|input| input.refs().iter().map(|r| r.resource.as_str()))
            .chain(self.depends_on.iter().map(|s| s.as_str()))
            .filter(|address| seen.insert(*address))
            .collect()
    }

    /// Everything that makes up the desired configuration of this resource.
    /// A change here means the resource has to be updated.
    pub fn desired(&self) -> serde_json::Value {
        serde_json::json!({
            "spec": self.spec,
            "inputs": self.inputs,
        })
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.spec.get(key).and_then(|v| v.as_str())
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.spec.get(key).and_then(|v| v.as_u64())
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.spec.get(key).and_then(|v| v.as_bool())
    }

    pub fn strings(&self, key: &str) -> Vec<&str> {
        self.spec
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn input(&self, key: &str) -> &[OutputRef] {
        self.inputs.get(key).map(|i| i.refs()).unwrap_or_default()
    }
}

/// Why an edge exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Binding,
    Ordering,
}

/// Resources of a topology and the bindings between them
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource; addresses must be unique
    pub fn add(&mut self, resource: Resource) -> Result<OutputRef> {
        if self.index.contains_key(&resource.address) {
            return Err(CloudError::DuplicateResource(resource.address));
        }
        let id = resource.output("id");
        self.index
            .insert(resource.address.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(id)
    }

    pub fn get(&self, address: &str) -> Option<&Resource> {
        self.index.get(address).map(|&i| &self.resources[i])
    }

    pub fn contains(&self, address: &str) -> bool {
        self.index.contains_key(address)
    }

    /// Resources in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn by_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Check that every binding names an existing resource and one of its
    /// declared outputs
    pub fn resolve(&self) -> Result<()> {
        for resource in &self.resources {
            for (input, value) in &resource.inputs {
                for source in value.refs() {
                    let declared = self
                        .get(&source.resource)
                        .is_some_and(|target| target.kind.has_output(&source.output));
                    if !declared {
                        return Err(CloudError::UnresolvedBinding {
                            resource: resource.address.clone(),
                            input: input.clone(),
                            target: source.to_string(),
                        });
                    }
                }
            }
            for address in &resource.depends_on {
                if !self.contains(address) {
                    return Err(CloudError::UnresolvedBinding {
                        resource: resource.address.clone(),
                        input: "depends_on".to_string(),
                        target: address.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn build(&self) -> Result<DiGraph<&str, EdgeKind>> {
        self.resolve()?;

        let mut graph = DiGraph::with_capacity(self.resources.len(), self.resources.len() * 2);
        let nodes: Vec<NodeIndex> = self
            .resources
            .iter()
            .map(|r| graph.add_node(r.address.as_str()))
            .collect();

        for (i, resource) in self.resources.iter().enumerate() {
            let binding_sources: HashSet<&str> = resource
                .inputs
                .values()
                .flat_map(|input| input.refs().iter().map(|r| r.resource.as_str()))
                .collect();
            for address in resource.dependencies() {
                let kind = if binding_sources.contains(address) {
                    EdgeKind::Binding
                } else {
                    EdgeKind::Ordering
                };
                graph.add_edge(nodes[self.index[address]], nodes[i], kind);
            }
        }

        Ok(graph)
    }

    /// Addresses in creation order
    pub fn order(&self) -> Result<Vec<String>> {
        let graph = self.build()?;
        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(|idx| graph[idx].to_string()).collect()),
            Err(_) => {
                let cycle = tarjan_scc(&graph)
                    .into_iter()
                    .find(|scc| scc.len() > 1)
                    .map(|scc| scc.into_iter().map(|idx| graph[idx].to_string()).collect())
                    .unwrap_or_default();
                Err(CloudError::DependencyCycle(cycle))
            }
        }
    }

    /// Direct dependencies of a resource
    pub fn dependencies_of(&self, address: &str) -> Vec<&str> {
        self.get(address)
            .map(|r| r.dependencies())
            .unwrap_or_default()
    }

    /// Every resource that depends on `address`, directly or transitively
    pub fn dependents_of(&self, address: &str) -> Result<Vec<String>> {
        let graph = self.build()?;
        let Some(&start) = self.index.get(address) else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([NodeIndex::new(start)]);
        while let Some(current) = queue.pop_front() {
            for neighbor in graph.neighbors_directed(current, Direction::Outgoing) {
                if seen.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }

        let mut dependents: Vec<String> = seen.into_iter().map(|idx| graph[idx].to_string()).collect();
        dependents.sort();
        Ok(dependents)
    }

    /// Graphviz rendering, one cluster per tier
    pub fn to_dot(&self) -> Result<String> {
        let graph = self.build()?;
        let mut output = String::from("digraph topology {\n  rankdir=LR;\n  node [shape=box];\n");

        for tier in [Tier::Network, Tier::Web, Tier::App, Tier::Data] {
            output.push_str(&format!("\n  subgraph cluster_{} {{\n    label=\"{}\";\n", tier, tier));
            for resource in self.resources.iter().filter(|r| r.tier == tier) {
                output.push_str(&format!(
                    "    \"{}\" [label=\"{}\\n{}\"];\n",
                    resource.address, resource.kind, resource.name
                ));
            }
            output.push_str("  }\n");
        }

        output.push('\n');
        for edge in graph.edge_references() {
            let style = match edge.weight() {
                EdgeKind::Binding => "solid",
                EdgeKind::Ordering => "dashed",
            };
            output.push_str(&format!(
                "  \"{}\" -> \"{}\" [style={}];\n",
                graph[edge.source()],
                graph[edge.target()],
                style
            ));
        }

        output.push_str("}\n");
        Ok(output)
    }
}
