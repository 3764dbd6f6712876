//! Graph node to Terraform resource conversion
//!
//! Every node becomes one `aws_*` resource. Bindings turn into `${type.name.attr}`
//! interpolations, so Terraform derives the same ordering the graph has. A few
//! nodes expand into helper resources Terraform models separately: elastic IPs
//! for NAT gateways, default routes and subnet associations for route tables.

use crate::Document;
use crate::error::{ExportError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use tierflow_cloud::{OutputRef, Resource, ResourceGraph, ResourceKind};

/// Terraform type a node of this kind is exported as
pub fn aws_type(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Network => "aws_vpc",
        ResourceKind::Subnet => "aws_subnet",
        ResourceKind::InternetGateway => "aws_internet_gateway",
        ResourceKind::NatGateway => "aws_nat_gateway",
        ResourceKind::RouteTable => "aws_route_table",
        ResourceKind::SecurityGroup => "aws_security_group",
        ResourceKind::SecurityGroupRule => "aws_security_group_rule",
        ResourceKind::LoadBalancer => "aws_lb",
        ResourceKind::TargetGroup => "aws_lb_target_group",
        ResourceKind::Listener => "aws_lb_listener",
        ResourceKind::LaunchTemplate => "aws_launch_template",
        ResourceKind::AutoScalingGroup => "aws_autoscaling_group",
        ResourceKind::DbSubnetGroup => "aws_db_subnet_group",
        ResourceKind::Database => "aws_db_instance",
    }
}

/// Terraform identifier for a logical name
///
/// Identifiers may contain letters, digits, underscores and dashes and must not
/// start with a digit.
pub fn terraform_name(name: &str) -> String {
    let mut identifier: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !identifier.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        identifier.insert(0, '_');
    }
    identifier
}

/// Resolves graph references to Terraform addresses
pub struct Context<'a> {
    graph: &'a ResourceGraph,
    region: &'a str,
}

impl<'a> Context<'a> {
    pub fn new(graph: &'a ResourceGraph, region: &'a str) -> Self {
        Self { graph, region }
    }

    fn target(&self, from: &str, address: &str) -> Result<&'a Resource> {
        self.graph
            .get(address)
            .ok_or_else(|| ExportError::UnknownReference {
                resource: from.to_string(),
                target: address.to_string(),
            })
    }

    /// `type.name` of the node at `address`
    fn address(&self, from: &str, address: &str) -> Result<String> {
        let target = self.target(from, address)?;
        Ok(format!(
            "{}.{}",
            aws_type(target.kind),
            terraform_name(&target.name)
        ))
    }

    fn interpolate_for(&self, from: &str, output: &OutputRef) -> Result<String> {
        Ok(format!(
            "${{{}.{}}}",
            self.address(from, &output.resource)?,
            output.output
        ))
    }

    /// `${type.name.attr}` for an output reference
    pub fn interpolate(&self, output: &OutputRef) -> Result<String> {
        self.interpolate_for(&output.resource, output)
    }

    fn one(&self, resource: &Resource, key: &str) -> Result<Value> {
        let output = resource
            .input(key)
            .first()
            .ok_or_else(|| ExportError::MissingAttribute {
                resource: resource.address.clone(),
                attribute: key.to_string(),
            })?;
        Ok(json!(self.interpolate_for(&resource.address, output)?))
    }

    /// Like `one`, but `null` when the input is not bound
    fn maybe_one(&self, resource: &Resource, key: &str) -> Result<Value> {
        if resource.inputs.contains_key(key) {
            self.one(resource, key)
        } else {
            Ok(Value::Null)
        }
    }

    fn many(&self, resource: &Resource, key: &str) -> Result<Value> {
        let values = resource
            .input(key)
            .iter()
            .map(|output| self.interpolate_for(&resource.address, output))
            .collect::<Result<Vec<_>>>()?;
        Ok(json!(values))
    }

    /// Availability zone name; short zone suffixes are qualified with the region
    fn zone(&self, zone: &str) -> String {
        if zone.starts_with(self.region) {
            zone.to_string()
        } else {
            format!("{}{}", self.region, zone)
        }
    }
}

fn spec(resource: &Resource, key: &str) -> Value {
    resource.spec.get(key).cloned().unwrap_or(Value::Null)
}

/// Object from key/value pairs, leaving out `null` values
fn block<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Object(
        entries
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

/// Add the Terraform resources for one graph node
pub fn convert(ctx: &Context<'_>, resource: &Resource, document: &mut Document) -> Result<()> {
    let name = terraform_name(&resource.name);
    let tags = spec(resource, "tags");

    let mut body = match resource.kind {
        ResourceKind::Network => block([
            ("cidr_block", spec(resource, "cidr")),
            ("enable_dns_hostnames", spec(resource, "dns_hostnames")),
            ("enable_dns_support", spec(resource, "dns_support")),
            ("tags", tags),
        ]),
        ResourceKind::Subnet => block([
            ("vpc_id", ctx.one(resource, "network")?),
            ("cidr_block", spec(resource, "cidr")),
            (
                "availability_zone",
                resource
                    .str("zone")
                    .map(|zone| json!(ctx.zone(zone)))
                    .unwrap_or(Value::Null),
            ),
            ("map_public_ip_on_launch", spec(resource, "map_public_ip")),
            ("tags", tags),
        ]),
        ResourceKind::InternetGateway => block([
            ("vpc_id", ctx.one(resource, "network")?),
            ("tags", tags),
        ]),
        ResourceKind::NatGateway => {
            document.add(
                "aws_eip",
                &name,
                block([("domain", json!("vpc")), ("tags", tags.clone())]),
            )?;
            block([
                ("allocation_id", json!(format!("${{aws_eip.{}.id}}", name))),
                ("subnet_id", ctx.one(resource, "subnet")?),
                ("connectivity_type", spec(resource, "connectivity")),
                ("tags", tags),
            ])
        }
        ResourceKind::RouteTable => {
            route_table_helpers(ctx, resource, &name, document)?;
            block([("vpc_id", ctx.one(resource, "network")?), ("tags", tags)])
        }
        ResourceKind::SecurityGroup => block([
            ("name", spec(resource, "name")),
            ("description", spec(resource, "description")),
            ("vpc_id", ctx.one(resource, "network")?),
            ("tags", tags),
        ]),
        ResourceKind::SecurityGroupRule => block([
            ("type", spec(resource, "direction")),
            ("protocol", spec(resource, "protocol")),
            ("from_port", spec(resource, "from_port")),
            ("to_port", spec(resource, "to_port")),
            ("description", spec(resource, "description")),
            ("security_group_id", ctx.one(resource, "security_group")?),
            ("cidr_blocks", spec(resource, "cidr_blocks")),
            (
                "source_security_group_id",
                ctx.maybe_one(resource, "peer_security_group")?,
            ),
        ]),
        ResourceKind::TargetGroup => block([
            ("name", spec(resource, "name")),
            ("port", spec(resource, "port")),
            ("protocol", spec(resource, "protocol")),
            ("target_type", spec(resource, "target_type")),
            ("vpc_id", ctx.one(resource, "network")?),
            (
                "preserve_client_ip",
                resource
                    .bool("preserve_client_ip")
                    .map(|preserve| json!(preserve.to_string()))
                    .unwrap_or(Value::Null),
            ),
            (
                "health_check",
                resource
                    .spec
                    .get("health_check")
                    .map(|check| json!([check]))
                    .unwrap_or(Value::Null),
            ),
            ("tags", tags),
        ]),
        ResourceKind::LoadBalancer => block([
            ("name", spec(resource, "name")),
            ("internal", json!(resource.str("scheme") == Some("internal"))),
            ("load_balancer_type", spec(resource, "load_balancer_type")),
            ("subnets", ctx.many(resource, "subnets")?),
            (
                "security_groups",
                if resource.inputs.contains_key("security_groups") {
                    ctx.many(resource, "security_groups")?
                } else {
                    Value::Null
                },
            ),
            ("tags", tags),
        ]),
        ResourceKind::Listener => block([
            ("load_balancer_arn", ctx.one(resource, "load_balancer")?),
            ("port", spec(resource, "port")),
            ("protocol", spec(resource, "protocol")),
            (
                "default_action",
                json!([{
                    "type": "forward",
                    "target_group_arn": ctx.one(resource, "target_group")?,
                }]),
            ),
            ("tags", tags),
        ]),
        ResourceKind::LaunchTemplate => block([
            ("name", spec(resource, "name")),
            ("image_id", spec(resource, "image")),
            ("instance_type", spec(resource, "instance_type")),
            ("key_name", spec(resource, "key_name")),
            (
                "user_data",
                resource
                    .str("user_data")
                    .map(|script| json!(STANDARD.encode(script)))
                    .unwrap_or(Value::Null),
            ),
            (
                "network_interfaces",
                json!([{
                    "associate_public_ip_address": spec(resource, "associate_public_ip"),
                    "security_groups": ctx.many(resource, "security_groups")?,
                }]),
            ),
            (
                "tag_specifications",
                json!([{ "resource_type": "instance", "tags": tags.clone() }]),
            ),
            ("tags", tags),
        ]),
        ResourceKind::AutoScalingGroup => block([
            ("name", spec(resource, "name")),
            ("desired_capacity", spec(resource, "desired")),
            ("min_size", spec(resource, "min")),
            ("max_size", spec(resource, "max")),
            ("vpc_zone_identifier", ctx.many(resource, "subnets")?),
            ("target_group_arns", ctx.many(resource, "target_groups")?),
            ("health_check_type", spec(resource, "health_check_type")),
            (
                "launch_template",
                json!([{
                    "id": ctx.one(resource, "launch_template")?,
                    "version": "$Latest",
                }]),
            ),
            ("tag", propagated_tags(&tags)),
        ]),
        ResourceKind::DbSubnetGroup => block([
            ("name", spec(resource, "name")),
            ("subnet_ids", ctx.many(resource, "subnets")?),
            ("tags", tags),
        ]),
        ResourceKind::Database => {
            let protected = resource.bool("deletion_protection").unwrap_or(false);
            block([
                ("identifier", spec(resource, "name")),
                ("engine", spec(resource, "engine")),
                ("engine_version", spec(resource, "engine_version")),
                ("instance_class", spec(resource, "class")),
                ("port", spec(resource, "port")),
                ("multi_az", spec(resource, "multi_zone")),
                (
                    "availability_zone",
                    resource
                        .str("zone")
                        .map(|zone| json!(ctx.zone(zone)))
                        .unwrap_or(Value::Null),
                ),
                ("allocated_storage", spec(resource, "storage_gb")),
                ("max_allocated_storage", spec(resource, "max_storage_gb")),
                ("backup_retention_period", spec(resource, "backup_retention_days")),
                ("deletion_protection", json!(protected)),
                ("publicly_accessible", spec(resource, "publicly_accessible")),
                ("storage_encrypted", spec(resource, "storage_encrypted")),
                ("db_subnet_group_name", ctx.one(resource, "subnet_group")?),
                ("vpc_security_group_ids", ctx.many(resource, "security_groups")?),
                ("db_name", spec(resource, "database_name")),
                ("username", json!("tierflow")),
                ("manage_master_user_password", json!(true)),
                ("skip_final_snapshot", json!(!protected)),
                (
                    "final_snapshot_identifier",
                    if protected {
                        resource
                            .str("name")
                            .map(|n| json!(format!("{}-final", n)))
                            .unwrap_or(Value::Null)
                    } else {
                        Value::Null
                    },
                ),
                ("tags", tags),
            ])
        }
    };

    if !resource.depends_on.is_empty() {
        let depends_on = resource
            .depends_on
            .iter()
            .map(|address| ctx.address(&resource.address, address))
            .collect::<Result<Vec<_>>>()?;
        if let Value::Object(fields) = &mut body {
            fields.insert("depends_on".to_string(), json!(depends_on));
        }
    }

    document.add(aws_type(resource.kind), &name, body)
}

/// Default route and subnet associations of a route table
fn route_table_helpers(
    ctx: &Context<'_>,
    resource: &Resource,
    name: &str,
    document: &mut Document,
) -> Result<()> {
    let table_id = json!(format!("${{aws_route_table.{}.id}}", name));

    let gateway = resource
        .input("gateway")
        .first()
        .ok_or_else(|| ExportError::MissingAttribute {
            resource: resource.address.clone(),
            attribute: "gateway".to_string(),
        })?;
    let target_key = match ctx.target(&resource.address, &gateway.resource)?.kind {
        ResourceKind::NatGateway => "nat_gateway_id",
        _ => "gateway_id",
    };
    let mut route = Map::new();
    route.insert("route_table_id".to_string(), table_id.clone());
    route.insert(
        "destination_cidr_block".to_string(),
        spec(resource, "destination"),
    );
    route.insert(
        target_key.to_string(),
        json!(ctx.interpolate_for(&resource.address, gateway)?),
    );
    document.add("aws_route", &format!("{}-default", name), Value::Object(route))?;

    for subnet in resource.input("subnets") {
        let target = ctx.target(&resource.address, &subnet.resource)?;
        document.add(
            "aws_route_table_association",
            &format!("{}-{}", name, terraform_name(&target.name)),
            json!({
                "subnet_id": ctx.interpolate_for(&resource.address, subnet)?,
                "route_table_id": table_id,
            }),
        )?;
    }
    Ok(())
}

/// Auto scaling groups take tags as a list that also propagates to instances
fn propagated_tags(tags: &Value) -> Value {
    let Some(tags) = tags.as_object() else {
        return Value::Null;
    };
    Value::Array(
        tags.iter()
            .map(|(key, value)| {
                json!({
                    "key": key,
                    "value": value,
                    "propagate_at_launch": true,
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terraform_name() {
        assert_eq!(terraform_name("public-ap-northeast-1a"), "public-ap-northeast-1a");
        assert_eq!(terraform_name("web.80"), "web_80");
        assert_eq!(terraform_name("1a"), "_1a");
    }

    #[test]
    fn test_zone_qualification() {
        let graph = ResourceGraph::new();
        let ctx = Context::new(&graph, "ap-northeast-1");
        assert_eq!(ctx.zone("a"), "ap-northeast-1a");
        assert_eq!(ctx.zone("ap-northeast-1c"), "ap-northeast-1c");
    }

    #[test]
    fn test_block_drops_nulls() {
        let value = block([("a", json!(1)), ("b", Value::Null)]);
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_propagated_tags() {
        let tags = propagated_tags(&json!({"Name": "shop-web", "Tier": "web"}));
        assert_eq!(tags.as_array().unwrap().len(), 2);
        assert_eq!(tags[0]["key"], "Name");
        assert_eq!(tags[0]["propagate_at_launch"], true);
    }
}
