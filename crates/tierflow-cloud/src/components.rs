//! Component constructors
//!
//! One constructor per tier. Each takes the shared [`Settings`], its own tier
//! spec and the outputs of the layer below, adds its resources to the graph and
//! returns the references the next layer consumes.

use crate::error::{CloudError, Result};
use crate::graph::{OutputRef, Resource, ResourceGraph, ResourceKind};
use crate::outputs::TopologyOutputs;
use serde_json::json;
use std::collections::BTreeMap;
use tierflow_core::{
    AppTierSpec, Cidr, DataTierSpec, NatMode, NetworkSpec, Settings, Tier, Topology, Visibility,
    WebTierSpec,
};
use tracing::{debug, info};

/// What the network foundation hands to the tiers above it
#[derive(Debug, Clone)]
pub struct NetworkOutputs {
    pub network_id: OutputRef,
    pub cidr: Cidr,
    pub zones: Vec<String>,
    pub public_subnets: Vec<OutputRef>,
    pub private_subnets: Vec<OutputRef>,
    pub private_cidrs: Vec<Cidr>,
    pub public_route_table: OutputRef,
    /// Private route table of each zone
    pub private_route_tables: BTreeMap<String, OutputRef>,
    pub nat_gateways: Vec<OutputRef>,
}

#[derive(Debug, Clone)]
pub struct WebOutputs {
    pub security_group: OutputRef,
    pub load_balancer_dns: OutputRef,
    pub target_group: OutputRef,
    pub auto_scaling_group: OutputRef,
}

#[derive(Debug, Clone)]
pub struct AppOutputs {
    pub security_group: OutputRef,
    pub load_balancer_dns: OutputRef,
    pub auto_scaling_group: OutputRef,
}

#[derive(Debug, Clone)]
pub struct DataOutputs {
    pub security_group: OutputRef,
    pub endpoint: OutputRef,
    pub port: u16,
}

/// Build the resource graph of a topology
#[tracing::instrument(skip(topology), fields(project = %topology.name()))]
pub fn synthesize(topology: &Topology) -> Result<(ResourceGraph, TopologyOutputs)> {
    let settings = &topology.settings;
    let mut graph = ResourceGraph::new();

    let network = network(&mut graph, settings, &topology.network)?;
    let web = web(&mut graph, settings, &topology.web, &network, topology.app.port)?;
    let app = app(
        &mut graph,
        settings,
        &topology.app,
        &network,
        &web,
        topology.data.effective_port(),
    )?;
    let data = data(&mut graph, settings, &topology.data, &network, &app)?;

    graph.resolve()?;
    info!(resources = graph.len(), "Synthesized resource graph");

    Ok((
        graph,
        TopologyOutputs {
            network,
            web,
            app,
            data,
        },
    ))
}

fn tags(settings: &Settings, name: &str, tier: Tier) -> serde_json::Value {
    json!(settings.tags_for(name, tier.as_str()))
}

/// Resource with its physical name and tags set
fn named(settings: &Settings, kind: ResourceKind, name: &str, tier: Tier) -> Resource {
    let physical = settings.resource_name(name);
    let tags = tags(settings, &physical, tier);
    Resource::new(kind, name, tier)
        .with("name", json!(physical))
        .with("tags", tags)
}

/// Single-port TCP rule attached to `group`
fn rule(
    settings: &Settings,
    tier: Tier,
    name: &str,
    group: &OutputRef,
    direction: &str,
    port: u16,
    description: &str,
) -> Resource {
    named(settings, ResourceKind::SecurityGroupRule, name, tier)
        .with("direction", json!(direction))
        .with("protocol", json!("tcp"))
        .with("from_port", json!(port))
        .with("to_port", json!(port))
        .with("description", json!(description))
        .bind("security_group", group.clone())
}

fn cidr_list(cidrs: &[Cidr]) -> serde_json::Value {
    json!(cidrs.iter().map(|c| c.to_string()).collect::<Vec<_>>())
}

/// Network foundation: network, subnet pairs, gateways and route tables
pub fn network(
    graph: &mut ResourceGraph,
    settings: &Settings,
    spec: &NetworkSpec,
) -> Result<NetworkOutputs> {
    let tier = Tier::Network;
    let cidr = spec
        .cidr
        .ok_or_else(|| CloudError::InvalidConfig("network address range is required".into()))?;
    let Some(first_zone) = spec.zones.first() else {
        return Err(CloudError::InvalidConfig(
            "network needs at least one zone".into(),
        ));
    };

    let network_id = graph.add(
        named(settings, ResourceKind::Network, "main", tier)
            .with("cidr", json!(cidr.to_string()))
            .with("dns_hostnames", json!(spec.dns_hostnames))
            .with("dns_support", json!(true)),
    )?;

    let gateway = graph.add(
        named(settings, ResourceKind::InternetGateway, "main", tier)
            .bind("network", network_id.clone()),
    )?;

    let mut public_subnets = Vec::new();
    let mut private_subnets = Vec::new();
    let mut private_cidrs = Vec::new();
    for zone in &spec.zones {
        for visibility in [Visibility::Public, Visibility::Private] {
            let range = match visibility {
                Visibility::Public => zone.public,
                Visibility::Private => zone.private,
            }
            .ok_or_else(|| {
                CloudError::InvalidConfig(format!(
                    "zone '{}' has no {} subnet range",
                    zone.name, visibility
                ))
            })?;

            let id = graph.add(
                named(
                    settings,
                    ResourceKind::Subnet,
                    &format!("{}-{}", visibility, zone.name),
                    tier,
                )
                .with("cidr", json!(range.to_string()))
                .with("zone", json!(zone.name))
                .with("visibility", json!(visibility))
                .with("map_public_ip", json!(visibility == Visibility::Public))
                .bind("network", network_id.clone()),
            )?;

            match visibility {
                Visibility::Public => public_subnets.push(id),
                Visibility::Private => {
                    private_subnets.push(id);
                    private_cidrs.push(range);
                }
            }
        }
    }

    let nat_zones: Vec<usize> = match spec.nat {
        NatMode::PerZone => (0..spec.zones.len()).collect(),
        NatMode::Single => vec![0],
    };
    let mut nat_by_zone: BTreeMap<&str, OutputRef> = BTreeMap::new();
    let mut nat_gateways = Vec::new();
    for i in nat_zones {
        let zone = &spec.zones[i];
        let nat = graph.add(
            named(
                settings,
                ResourceKind::NatGateway,
                &format!("nat-{}", zone.name),
                tier,
            )
            .with("zone", json!(zone.name))
            .with("connectivity", json!("public"))
            .bind("subnet", public_subnets[i].clone())
            .after(gateway.resource.clone()),
        )?;
        nat_by_zone.insert(zone.name.as_str(), nat.clone());
        nat_gateways.push(nat);
    }

    let public_route_table = graph.add(
        named(settings, ResourceKind::RouteTable, "public", tier)
            .with("visibility", json!(Visibility::Public))
            .with("destination", json!(Cidr::ANYWHERE.to_string()))
            .bind("network", network_id.clone())
            .bind("gateway", gateway.clone())
            .bind_all("subnets", public_subnets.clone()),
    )?;

    let mut private_route_tables = BTreeMap::new();
    for (i, zone) in spec.zones.iter().enumerate() {
        let nat = nat_by_zone
            .get(zone.name.as_str())
            .or_else(|| nat_by_zone.get(first_zone.name.as_str()))
            .cloned()
            .ok_or_else(|| {
                CloudError::InvalidConfig(format!("no NAT gateway for zone '{}'", zone.name))
            })?;
        let table = graph.add(
            named(
                settings,
                ResourceKind::RouteTable,
                &format!("private-{}", zone.name),
                tier,
            )
            .with("visibility", json!(Visibility::Private))
            .with("zone", json!(zone.name))
            .with("destination", json!(Cidr::ANYWHERE.to_string()))
            .bind("network", network_id.clone())
            .bind("gateway", nat)
            .bind_all("subnets", vec![private_subnets[i].clone()]),
        )?;
        private_route_tables.insert(zone.name.clone(), table);
    }

    debug!(
        zones = spec.zones.len(),
        nat_gateways = nat_gateways.len(),
        "Added network foundation"
    );

    Ok(NetworkOutputs {
        network_id,
        cidr,
        zones: spec.zones.iter().map(|z| z.name.clone()).collect(),
        public_subnets,
        private_subnets,
        private_cidrs,
        public_route_table,
        private_route_tables,
        nat_gateways,
    })
}

/// Web tier: internet-facing application load balancer and a fleet in the public subnets
pub fn web(
    graph: &mut ResourceGraph,
    settings: &Settings,
    spec: &WebTierSpec,
    network: &NetworkOutputs,
    app_port: u16,
) -> Result<WebOutputs> {
    let tier = Tier::Web;

    let security_group = graph.add(
        named(settings, ResourceKind::SecurityGroup, "web", tier)
            .with(
                "description",
                json!("web tier: public ingress on the web ports"),
            )
            .bind("network", network.network_id.clone()),
    )?;

    for port in &spec.ports {
        graph.add(
            rule(
                settings,
                tier,
                &format!("web-ingress-{}", port),
                &security_group,
                "ingress",
                *port,
                "public web traffic",
            )
            .with("cidr_blocks", cidr_list(&[Cidr::ANYWHERE])),
        )?;
    }
    // the load balancer shares this group and forwards to the instances
    graph.add(
        rule(
            settings,
            tier,
            &format!("web-egress-{}", spec.target_port),
            &security_group,
            "egress",
            spec.target_port,
            "load balancer to web instances",
        )
        .bind("peer_security_group", security_group.clone()),
    )?;
    graph.add(
        rule(
            settings,
            tier,
            &format!("web-egress-app-{}", app_port),
            &security_group,
            "egress",
            app_port,
            "web instances to app tier",
        )
        .with("cidr_blocks", cidr_list(&network.private_cidrs)),
    )?;

    let check = &spec.health_check;
    let target_group = graph.add(
        named(settings, ResourceKind::TargetGroup, "web", tier)
            .with("port", json!(spec.target_port))
            .with("protocol", json!("HTTP"))
            .with("target_type", json!("instance"))
            .with(
                "health_check",
                json!({
                    "protocol": "HTTP",
                    "port": "traffic-port",
                    "path": check.path,
                    "interval": check.interval,
                    "healthy_threshold": check.healthy_threshold,
                    "unhealthy_threshold": check.unhealthy_threshold,
                }),
            )
            .bind("network", network.network_id.clone()),
    )?;
    let target_group_arn = OutputRef::new(target_group.resource.clone(), "arn");

    let load_balancer = graph.add(
        named(settings, ResourceKind::LoadBalancer, "web", tier)
            .with("scheme", json!("internet-facing"))
            .with("load_balancer_type", json!("application"))
            .with("zones", json!(network.zones))
            .bind_all("subnets", network.public_subnets.clone())
            .bind_all("security_groups", vec![security_group.clone()]),
    )?;

    for port in &spec.ports {
        graph.add(
            named(
                settings,
                ResourceKind::Listener,
                &format!("web-{}", port),
                tier,
            )
            .with("port", json!(port))
            .with("protocol", json!("HTTP"))
            .bind(
                "load_balancer",
                OutputRef::new(load_balancer.resource.clone(), "arn"),
            )
            .bind("target_group", target_group_arn.clone()),
        )?;
    }

    let launch_template = graph.add(launch_template(
        settings,
        tier,
        &spec.fleet,
        true,
        &security_group,
    ))?;

    let auto_scaling_group = graph.add(
        fleet_group(settings, tier, &spec.fleet, &launch_template)
            .bind_all("subnets", network.public_subnets.clone())
            .bind_all("target_groups", vec![target_group_arn]),
    )?;

    debug!(ports = ?spec.ports, "Added web tier");

    Ok(WebOutputs {
        security_group,
        load_balancer_dns: OutputRef::new(load_balancer.resource, "dns_name"),
        target_group,
        auto_scaling_group,
    })
}

/// App tier: internal network load balancer and a fleet in the private subnets
pub fn app(
    graph: &mut ResourceGraph,
    settings: &Settings,
    spec: &AppTierSpec,
    network: &NetworkOutputs,
    web: &WebOutputs,
    db_port: u16,
) -> Result<AppOutputs> {
    let tier = Tier::App;

    let security_group = graph.add(
        named(settings, ResourceKind::SecurityGroup, "app", tier)
            .with(
                "description",
                json!("app tier: ingress from the web tier only"),
            )
            .bind("network", network.network_id.clone()),
    )?;

    graph.add(
        rule(
            settings,
            tier,
            &format!("app-ingress-{}", spec.port),
            &security_group,
            "ingress",
            spec.port,
            "web tier to app instances",
        )
        .bind("peer_security_group", web.security_group.clone()),
    )?;
    graph.add(
        rule(
            settings,
            tier,
            &format!("app-egress-db-{}", db_port),
            &security_group,
            "egress",
            db_port,
            "app instances to database",
        )
        .with("cidr_blocks", cidr_list(&network.private_cidrs)),
    )?;

    let target_group = graph.add(
        named(settings, ResourceKind::TargetGroup, "app", tier)
            .with("port", json!(spec.port))
            .with("protocol", json!("TCP"))
            .with("target_type", json!("instance"))
            .with("preserve_client_ip", json!(true))
            .with(
                "health_check",
                json!({
                    "protocol": "TCP",
                    "port": "traffic-port",
                    "interval": 30,
                    "healthy_threshold": 3,
                    "unhealthy_threshold": 3,
                }),
            )
            .bind("network", network.network_id.clone()),
    )?;
    let target_group_arn = OutputRef::new(target_group.resource.clone(), "arn");

    // no security group on the balancer: with client addresses preserved the
    // instances see web tier sources directly
    let load_balancer = graph.add(
        named(settings, ResourceKind::LoadBalancer, "app", tier)
            .with("scheme", json!("internal"))
            .with("load_balancer_type", json!("network"))
            .with("zones", json!(network.zones))
            .bind_all("subnets", network.private_subnets.clone()),
    )?;

    graph.add(
        named(settings, ResourceKind::Listener, &format!("app-{}", spec.port), tier)
            .with("port", json!(spec.port))
            .with("protocol", json!("TCP"))
            .bind(
                "load_balancer",
                OutputRef::new(load_balancer.resource.clone(), "arn"),
            )
            .bind("target_group", target_group_arn.clone()),
    )?;

    let launch_template = graph.add(launch_template(
        settings,
        tier,
        &spec.fleet,
        false,
        &security_group,
    ))?;

    let auto_scaling_group = graph.add(
        fleet_group(settings, tier, &spec.fleet, &launch_template)
            .bind_all("subnets", network.private_subnets.clone())
            .bind_all("target_groups", vec![target_group_arn]),
    )?;

    debug!(port = spec.port, "Added app tier");

    Ok(AppOutputs {
        security_group,
        load_balancer_dns: OutputRef::new(load_balancer.resource, "dns_name"),
        auto_scaling_group,
    })
}

/// Data tier: managed database in the private subnets
pub fn data(
    graph: &mut ResourceGraph,
    settings: &Settings,
    spec: &DataTierSpec,
    network: &NetworkOutputs,
    app: &AppOutputs,
) -> Result<DataOutputs> {
    let tier = Tier::Data;
    let port = spec.effective_port();

    let security_group = graph.add(
        named(settings, ResourceKind::SecurityGroup, "data", tier)
            .with(
                "description",
                json!("data tier: ingress from the app tier only"),
            )
            .bind("network", network.network_id.clone()),
    )?;

    graph.add(
        rule(
            settings,
            tier,
            &format!("data-ingress-{}", port),
            &security_group,
            "ingress",
            port,
            "app tier to database",
        )
        .bind("peer_security_group", app.security_group.clone()),
    )?;

    let subnet_group = graph.add(
        named(settings, ResourceKind::DbSubnetGroup, "main", tier)
            .with("zones", json!(network.zones))
            .bind_all("subnets", network.private_subnets.clone()),
    )?;

    let mut database = named(settings, ResourceKind::Database, "main", tier)
        .with("engine", json!(spec.engine))
        .with("class", json!(spec.class))
        .with("port", json!(port))
        .with("multi_zone", json!(spec.multi_zone))
        .with("storage_gb", json!(spec.storage_gb))
        .with("backup_retention_days", json!(spec.backup_retention_days))
        .with("deletion_protection", json!(spec.deletion_protection))
        .with("publicly_accessible", json!(false))
        .with("storage_encrypted", json!(true))
        .bind(
            "subnet_group",
            OutputRef::new(subnet_group.resource.clone(), "name"),
        )
        .bind_all("security_groups", vec![security_group.clone()]);
    if let Some(version) = &spec.engine_version {
        database = database.with("engine_version", json!(version));
    }
    if let Some(max) = spec.max_storage_gb {
        database = database.with("max_storage_gb", json!(max));
    }
    if let Some(name) = &spec.database_name {
        database = database.with("database_name", json!(name));
    }
    if !spec.multi_zone
        && let Some(zone) = network.zones.first()
    {
        database = database.with("zone", json!(zone));
    }
    let database = graph.add(database)?;

    debug!(engine = %spec.engine, multi_zone = spec.multi_zone, "Added data tier");

    Ok(DataOutputs {
        security_group,
        endpoint: OutputRef::new(database.resource, "endpoint"),
        port,
    })
}

fn launch_template(
    settings: &Settings,
    tier: Tier,
    fleet: &tierflow_core::FleetSpec,
    public_ip: bool,
    security_group: &OutputRef,
) -> Resource {
    let mut template = named(settings, ResourceKind::LaunchTemplate, tier.as_str(), tier)
        .with("instance_type", json!(fleet.instance_type))
        .with("image", json!(fleet.image))
        .with("associate_public_ip", json!(public_ip))
        .bind_all("security_groups", vec![security_group.clone()]);
    if let Some(key) = &fleet.key_name {
        template = template.with("key_name", json!(key));
    }
    if let Some(user_data) = &fleet.user_data {
        template = template.with("user_data", json!(user_data));
    }
    template
}

fn fleet_group(
    settings: &Settings,
    tier: Tier,
    fleet: &tierflow_core::FleetSpec,
    launch_template: &OutputRef,
) -> Resource {
    named(settings, ResourceKind::AutoScalingGroup, tier.as_str(), tier)
        .with("desired", json!(fleet.desired))
        .with("min", json!(fleet.min))
        .with("max", json!(fleet.max))
        .with("health_check_type", json!("ELB"))
        .bind("launch_template", launch_template.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::topology;

    #[test]
    fn test_synthesize_resource_counts() {
        let (graph, outputs) = synthesize(&topology()).unwrap();

        let count = |kind| graph.by_kind(kind).count();
        assert_eq!(count(ResourceKind::Network), 1);
        assert_eq!(count(ResourceKind::Subnet), 4);
        assert_eq!(count(ResourceKind::InternetGateway), 1);
        assert_eq!(count(ResourceKind::NatGateway), 2);
        assert_eq!(count(ResourceKind::RouteTable), 3);
        assert_eq!(count(ResourceKind::SecurityGroup), 3);
        assert_eq!(count(ResourceKind::LoadBalancer), 2);
        assert_eq!(count(ResourceKind::Listener), 3);
        assert_eq!(count(ResourceKind::AutoScalingGroup), 2);
        assert_eq!(count(ResourceKind::Database), 1);

        assert_eq!(outputs.network.public_subnets.len(), 2);
        assert_eq!(outputs.network.private_subnets.len(), 2);
        assert_eq!(outputs.network.private_route_tables.len(), 2);
        assert_eq!(outputs.data.port, 5432);
    }

    #[test]
    fn test_layers_are_created_bottom_up() {
        let (graph, _) = synthesize(&topology()).unwrap();
        let order = graph.order().unwrap();
        let pos = |address: &str| order.iter().position(|a| a == address).unwrap();

        assert!(pos("network.main") < pos("security-group.web"));
        assert!(pos("security-group.web") < pos("security-group-rule.app-ingress-8080"));
        assert!(pos("security-group.app") < pos("security-group-rule.data-ingress-5432"));
        assert!(pos("launch-template.web") < pos("auto-scaling-group.web"));
        assert!(pos("db-subnet-group.main") < pos("database.main"));
    }

    #[test]
    fn test_single_nat_shared_by_private_tables() {
        let mut topology = topology();
        topology.network.nat = NatMode::Single;
        let (graph, outputs) = synthesize(&topology).unwrap();

        assert_eq!(graph.by_kind(ResourceKind::NatGateway).count(), 1);
        let gateways: Vec<_> = outputs
            .network
            .private_route_tables
            .values()
            .map(|t| graph.get(&t.resource).unwrap().input("gateway")[0].resource.clone())
            .collect();
        assert_eq!(gateways, vec!["nat-gateway.nat-a", "nat-gateway.nat-a"]);
    }

    #[test]
    fn test_names_and_tags_carry_stage() {
        let mut topology = topology();
        topology.settings.stage = Some("prod".to_string());
        let (graph, _) = synthesize(&topology).unwrap();

        let sg = graph.get("security-group.web").unwrap();
        assert_eq!(sg.str("name"), Some("shop-prod-web"));
        assert_eq!(sg.spec["tags"]["Stage"], "prod");
        assert_eq!(sg.spec["tags"]["Tier"], "web");
    }

    #[test]
    fn test_app_fleet_has_no_public_address() {
        let (graph, _) = synthesize(&topology()).unwrap();
        let lt = graph.get("launch-template.app").unwrap();
        assert_eq!(lt.bool("associate_public_ip"), Some(false));
        let db = graph.get("database.main").unwrap();
        assert_eq!(db.bool("publicly_accessible"), Some(false));
    }

    #[test]
    fn test_missing_subnet_range() {
        let mut topology = topology();
        topology.network.zones[1].private = None;
        let err = synthesize(&topology).unwrap_err();
        assert!(err.to_string().contains("no private subnet range"));
    }
}
