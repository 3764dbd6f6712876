//! Isolation policy checks on a synthesized graph
//!
//! Every rule reads the graph only, so a hand-edited or partially synthesized graph
//! is checked the same way as one produced by the component constructors.

use crate::error::{CloudError, Result};
use crate::graph::{Resource, ResourceGraph, ResourceKind};
use std::collections::BTreeSet;
use std::fmt;
use tierflow_core::{Cidr, Tier};

const PUBLIC: &str = "public";
const PRIVATE: &str = "private";
const MIN_ZONES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Rule identifier, e.g. `private-subnet-egress`
    pub rule: &'static str,
    pub resource: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.rule, self.resource, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyReport {
    pub violations: Vec<Violation>,
}

impl PolicyReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            return Ok(());
        }
        Err(CloudError::PolicyViolation(
            self.violations.iter().map(|v| v.to_string()).collect(),
        ))
    }

    fn push(&mut self, rule: &'static str, resource: &str, message: impl Into<String>) {
        self.violations.push(Violation {
            rule,
            resource: resource.to_string(),
            message: message.into(),
        });
    }
}

/// Direction, ports and source of one security group rule
struct Rule<'a> {
    resource: &'a Resource,
    ingress: bool,
    from_port: u64,
    to_port: u64,
    peer: Option<&'a str>,
    cidrs: Vec<&'a str>,
}

impl Rule<'_> {
    fn covers(&self, port: u64) -> bool {
        self.from_port <= port && port <= self.to_port
    }

    fn single_port(&self) -> Option<u64> {
        (self.from_port == self.to_port).then_some(self.from_port)
    }

    fn from_anywhere(&self) -> bool {
        self.cidrs
            .iter()
            .any(|c| c.parse::<Cidr>().is_ok_and(|c| c.is_anywhere()))
    }
}

struct Checker<'a> {
    graph: &'a ResourceGraph,
    report: PolicyReport,
}

/// Run every isolation rule against the graph
#[tracing::instrument(skip(graph), fields(resources = graph.len()))]
pub fn check(graph: &ResourceGraph) -> PolicyReport {
    let mut checker = Checker {
        graph,
        report: PolicyReport::default(),
    };

    checker.subnet_routes();
    checker.web_ingress();
    checker.app_ingress();
    checker.data_ingress();
    checker.egress_chain();
    checker.no_public_addresses();
    checker.zone_span();
    checker.load_balancer_exposure();

    tracing::debug!(violations = checker.report.violations.len(), "Policy check complete");
    checker.report
}

impl<'a> Checker<'a> {
    fn target(&self, resource: &Resource, input: &str) -> Option<&'a Resource> {
        resource
            .input(input)
            .first()
            .and_then(|r| self.graph.get(&r.resource))
    }

    fn targets(&self, resource: &Resource, input: &str) -> Vec<&'a Resource> {
        resource
            .input(input)
            .iter()
            .filter_map(|r| self.graph.get(&r.resource))
            .collect()
    }

    fn security_group(&self, tier: Tier) -> Option<&'a Resource> {
        self.graph
            .by_kind(ResourceKind::SecurityGroup)
            .find(|sg| sg.tier == tier)
    }

    fn rules_of(&self, group: &Resource) -> Vec<Rule<'a>> {
        self.graph
            .by_kind(ResourceKind::SecurityGroupRule)
            .filter(|r| {
                r.input("security_group")
                    .first()
                    .is_some_and(|sg| sg.resource == group.address)
            })
            .map(|r| Rule {
                resource: r,
                ingress: r.str("direction") == Some("ingress"),
                from_port: r.u64("from_port").unwrap_or(0),
                to_port: r.u64("to_port").unwrap_or(u64::from(u16::MAX)),
                peer: r
                    .input("peer_security_group")
                    .first()
                    .map(|p| p.resource.as_str()),
                cidrs: r.strings("cidr_blocks"),
            })
            .collect()
    }

    fn load_balancer(&self, scheme: &str) -> Option<&'a Resource> {
        self.graph
            .by_kind(ResourceKind::LoadBalancer)
            .find(|lb| lb.str("scheme") == Some(scheme))
    }

    fn listener_ports(&self, load_balancer: &Resource) -> BTreeSet<u64> {
        self.graph
            .by_kind(ResourceKind::Listener)
            .filter(|l| {
                l.input("load_balancer")
                    .first()
                    .is_some_and(|lb| lb.resource == load_balancer.address)
            })
            .filter_map(|l| l.u64("port"))
            .collect()
    }

    fn web_ports(&self) -> BTreeSet<u64> {
        self.load_balancer("internet-facing")
            .map(|lb| self.listener_ports(lb))
            .unwrap_or_default()
    }

    fn app_port(&self) -> Option<u64> {
        self.load_balancer("internal")
            .and_then(|lb| self.listener_ports(lb).into_iter().next())
    }

    fn db_port(&self) -> Option<u64> {
        self.graph
            .by_kind(ResourceKind::Database)
            .find_map(|db| db.u64("port"))
    }

    /// Private subnets route out through NAT only; public subnets have a
    /// default route to the internet gateway
    fn subnet_routes(&mut self) {
        for subnet in self.graph.by_kind(ResourceKind::Subnet) {
            let tables: Vec<&Resource> = self
                .graph
                .by_kind(ResourceKind::RouteTable)
                .filter(|t| {
                    t.input("subnets")
                        .iter()
                        .any(|s| s.resource == subnet.address)
                })
                .collect();
            let gateways: Vec<(ResourceKind, bool)> = tables
                .iter()
                .filter_map(|t| {
                    let default_route = t
                        .str("destination")
                        .and_then(|d| d.parse::<Cidr>().ok())
                        .is_some_and(|d| d.is_anywhere());
                    self.target(t, "gateway").map(|g| (g.kind, default_route))
                })
                .collect();

            match subnet.str("visibility") {
                Some(PRIVATE) => {
                    if gateways
                        .iter()
                        .any(|(kind, _)| *kind == ResourceKind::InternetGateway)
                    {
                        self.report.push(
                            "private-subnet-egress",
                            &subnet.address,
                            "private subnet routes to an internet gateway",
                        );
                    }
                    if !gateways
                        .iter()
                        .any(|(kind, default)| *kind == ResourceKind::NatGateway && *default)
                    {
                        self.report.push(
                            "private-subnet-egress",
                            &subnet.address,
                            "private subnet has no default route through a NAT gateway",
                        );
                    }
                }
                Some(PUBLIC) => {
                    if !gateways.iter().any(|(kind, default)| {
                        *kind == ResourceKind::InternetGateway && *default
                    }) {
                        self.report.push(
                            "public-subnet-route",
                            &subnet.address,
                            "public subnet has no default route to the internet gateway",
                        );
                    }
                }
                _ => self.report.push(
                    "subnet-visibility",
                    &subnet.address,
                    "subnet is neither public nor private",
                ),
            }
        }
    }

    /// Web group ingress: only the web ports, only from anywhere
    fn web_ingress(&mut self) {
        let Some(group) = self.security_group(Tier::Web) else {
            self.report.push("web-ingress", "security-group.web", "web security group is missing");
            return;
        };
        let web_ports = self.web_ports();
        let internal_ports: Vec<u64> = self.app_port().into_iter().chain(self.db_port()).collect();

        let ingress: Vec<Rule> = self.rules_of(group).into_iter().filter(|r| r.ingress).collect();
        for rule in &ingress {
            let on_web_port = rule.single_port().is_some_and(|p| web_ports.contains(&p));
            if !on_web_port || rule.peer.is_some() {
                self.report.push(
                    "web-ingress",
                    &rule.resource.address,
                    "web ingress must be a single web port from any source",
                );
            }
            for port in &internal_ports {
                if rule.from_anywhere() && rule.covers(*port) {
                    self.report.push(
                        "web-ingress",
                        &rule.resource.address,
                        format!("port {} is open to the internet", port),
                    );
                }
            }
        }
        for port in &web_ports {
            if !ingress.iter().any(|r| r.from_anywhere() && r.covers(*port)) {
                self.report.push(
                    "web-ingress",
                    &group.address,
                    format!("web port {} has no public ingress rule", port),
                );
            }
        }
    }

    /// App group: a single ingress rule, from the web group on the app port
    fn app_ingress(&mut self) {
        let (Some(group), Some(web)) = (
            self.security_group(Tier::App),
            self.security_group(Tier::Web),
        ) else {
            self.report.push("app-ingress", "security-group.app", "app or web security group is missing");
            return;
        };
        let app_port = self.app_port();
        self.single_peer_ingress("app-ingress", group, web, app_port);
    }

    /// Data group: a single ingress rule, from the app group on the database port
    fn data_ingress(&mut self) {
        let (Some(group), Some(app)) = (
            self.security_group(Tier::Data),
            self.security_group(Tier::App),
        ) else {
            self.report.push("data-ingress", "security-group.data", "data or app security group is missing");
            return;
        };
        let db_port = self.db_port();
        self.single_peer_ingress("data-ingress", group, app, db_port);

        for db in self.graph.by_kind(ResourceKind::Database) {
            if db.bool("publicly_accessible") != Some(false) {
                self.report.push("data-ingress", &db.address, "database must not be publicly accessible");
            }
            let groups = self.targets(db, "security_groups");
            if groups.len() != 1 || groups[0].address != group.address {
                self.report.push(
                    "data-ingress",
                    &db.address,
                    "database must be guarded by the data security group only",
                );
            }
        }
    }

    fn single_peer_ingress(
        &mut self,
        rule_name: &'static str,
        group: &Resource,
        peer: &Resource,
        port: Option<u64>,
    ) {
        let ingress: Vec<Rule> = self.rules_of(group).into_iter().filter(|r| r.ingress).collect();
        let [only] = ingress.as_slice() else {
            self.report.push(
                rule_name,
                &group.address,
                format!("expected exactly one ingress rule, found {}", ingress.len()),
            );
            return;
        };

        if only.peer != Some(peer.address.as_str()) || !only.cidrs.is_empty() {
            self.report.push(
                rule_name,
                &only.resource.address,
                format!("ingress must come from {} only", peer.address),
            );
        }
        if port.is_none() || only.single_port() != port {
            self.report.push(
                rule_name,
                &only.resource.address,
                format!(
                    "ingress must be on port {}",
                    port.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string())
                ),
            );
        }
    }

    fn web_target_port(&self) -> Option<u64> {
        self.graph
            .by_kind(ResourceKind::TargetGroup)
            .find(|tg| tg.tier == Tier::Web)
            .and_then(|tg| tg.u64("port"))
    }

    /// Each group reaches the next tier only; the data group has no egress
    ///
    /// The web group also carries one egress rule back to itself on the target
    /// port, used by the load balancer that shares the group.
    fn egress_chain(&mut self) {
        let web_target_port = self.web_target_port();
        let chain = [
            (Tier::Web, self.app_port()),
            (Tier::App, self.db_port()),
        ];
        for (tier, next_port) in chain {
            let Some(group) = self.security_group(tier) else {
                continue;
            };
            let egress: Vec<Rule> = self.rules_of(group).into_iter().filter(|r| !r.ingress).collect();
            let reaches_next = next_port.is_some_and(|p| egress.iter().any(|r| r.covers(p)));
            if !reaches_next {
                self.report.push(
                    "egress-chain",
                    &group.address,
                    format!("{} tier has no egress to the next tier", tier),
                );
            }
            for rule in &egress {
                let to_next = next_port.is_some() && rule.single_port() == next_port;
                let to_targets = tier == Tier::Web
                    && web_target_port.is_some()
                    && rule.single_port() == web_target_port
                    && rule.peer == Some(group.address.as_str())
                    && rule.cidrs.is_empty();
                if !to_next && !to_targets {
                    self.report.push(
                        "egress-chain",
                        &rule.resource.address,
                        format!(
                            "{} egress on ports {}-{} reaches beyond the next tier",
                            tier, rule.from_port, rule.to_port
                        ),
                    );
                }
                if rule.from_anywhere() {
                    self.report.push(
                        "egress-chain",
                        &rule.resource.address,
                        "egress to the internet is not allowed",
                    );
                }
            }
        }

        if let Some(group) = self.security_group(Tier::Data) {
            for rule in self.rules_of(group).into_iter().filter(|r| !r.ingress) {
                self.report.push("egress-chain", &rule.resource.address, "data tier must have no egress");
            }
        }
    }

    /// App and data resources never get a public address or a public subnet
    fn no_public_addresses(&mut self) {
        for template in self.graph.by_kind(ResourceKind::LaunchTemplate) {
            if template.tier != Tier::Web && template.bool("associate_public_ip") == Some(true) {
                self.report.push(
                    "no-public-address",
                    &template.address,
                    format!("{} instances must not get a public address", template.tier),
                );
            }
        }

        let placed = self
            .graph
            .by_kind(ResourceKind::AutoScalingGroup)
            .chain(self.graph.by_kind(ResourceKind::DbSubnetGroup))
            .chain(self.graph.by_kind(ResourceKind::LoadBalancer))
            .filter(|r| r.tier == Tier::App || r.tier == Tier::Data);
        for resource in placed {
            for subnet in self.targets(resource, "subnets") {
                if subnet.str("visibility") != Some(PRIVATE) {
                    self.report.push(
                        "no-public-address",
                        &resource.address,
                        format!("placed in non-private subnet {}", subnet.address),
                    );
                }
            }
        }
    }

    /// Load balancers, fleets and the database subnet group span two zones
    fn zone_span(&mut self) {
        let spread = self
            .graph
            .by_kind(ResourceKind::LoadBalancer)
            .chain(self.graph.by_kind(ResourceKind::AutoScalingGroup))
            .chain(self.graph.by_kind(ResourceKind::DbSubnetGroup));
        for resource in spread {
            let zones: BTreeSet<&str> = self
                .targets(resource, "subnets")
                .into_iter()
                .filter_map(|s| s.str("zone"))
                .collect();
            if zones.len() < MIN_ZONES {
                self.report.push(
                    "zone-span",
                    &resource.address,
                    format!("spans {} zone(s), needs at least {}", zones.len(), MIN_ZONES),
                );
            }
        }
    }

    /// Only the web load balancer faces the internet
    fn load_balancer_exposure(&mut self) {
        for lb in self.graph.by_kind(ResourceKind::LoadBalancer) {
            let public = lb.str("scheme") != Some("internal");
            if public && lb.tier != Tier::Web {
                self.report.push(
                    "lb-exposure",
                    &lb.address,
                    "only the web load balancer may be internet-facing",
                );
            }
            if !public && lb.tier == Tier::Web {
                self.report.push(
                    "lb-exposure",
                    &lb.address,
                    "web load balancer must be internet-facing",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::synthesize;
    use crate::graph::{OutputRef, Resource};
    use crate::test_support::topology;
    use serde_json::json;

    fn rules(report: &PolicyReport) -> Vec<&str> {
        report.violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn test_synthesized_topology_is_clean() {
        let (graph, _) = synthesize(&topology()).unwrap();
        let report = check(&graph);
        assert!(report.is_clean(), "{:?}", report.violations);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_single_nat_is_clean() {
        let mut topology = topology();
        topology.network.nat = tierflow_core::NatMode::Single;
        let (graph, _) = synthesize(&topology).unwrap();
        assert!(check(&graph).is_clean());
    }

    #[test]
    fn test_app_port_open_to_internet() {
        let (mut graph, _) = synthesize(&topology()).unwrap();
        graph
            .add(
                Resource::new(ResourceKind::SecurityGroupRule, "oops", Tier::Web)
                    .with("direction", json!("ingress"))
                    .with("from_port", json!(8080))
                    .with("to_port", json!(8080))
                    .with("cidr_blocks", json!(["0.0.0.0/0"]))
                    .bind("security_group", OutputRef::new("security-group.web", "id")),
            )
            .unwrap();

        let report = check(&graph);
        assert!(rules(&report).contains(&"web-ingress"));
        assert!(
            report
                .violations
                .iter()
                .any(|v| v.message.contains("port 8080 is open to the internet"))
        );
    }

    #[test]
    fn test_second_app_ingress_rule() {
        let (mut graph, _) = synthesize(&topology()).unwrap();
        graph
            .add(
                Resource::new(ResourceKind::SecurityGroupRule, "ssh", Tier::App)
                    .with("direction", json!("ingress"))
                    .with("from_port", json!(22))
                    .with("to_port", json!(22))
                    .with("cidr_blocks", json!(["10.0.0.0/16"]))
                    .bind("security_group", OutputRef::new("security-group.app", "id")),
            )
            .unwrap();

        let report = check(&graph);
        assert_eq!(rules(&report), vec!["app-ingress"]);
        assert!(report.violations[0].message.contains("found 2"));
    }

    #[test]
    fn test_data_egress_is_rejected() {
        let (mut graph, _) = synthesize(&topology()).unwrap();
        graph
            .add(
                Resource::new(ResourceKind::SecurityGroupRule, "data-out", Tier::Data)
                    .with("direction", json!("egress"))
                    .with("from_port", json!(443))
                    .with("to_port", json!(443))
                    .with("cidr_blocks", json!(["10.0.0.0/16"]))
                    .bind("security_group", OutputRef::new("security-group.data", "id")),
            )
            .unwrap();

        let report = check(&graph);
        assert_eq!(rules(&report), vec!["egress-chain"]);
    }

    fn egress_rule(name: &str, tier: Tier, group: &str, port: u16) -> Resource {
        Resource::new(ResourceKind::SecurityGroupRule, name, tier)
            .with("direction", json!("egress"))
            .with("from_port", json!(port))
            .with("to_port", json!(port))
            .with("cidr_blocks", json!(["10.0.11.0/24", "10.0.12.0/24"]))
            .bind("security_group", OutputRef::new(group, "id"))
    }

    #[test]
    fn test_web_egress_skipping_app_tier() {
        let (mut graph, _) = synthesize(&topology()).unwrap();
        graph
            .add(egress_rule("web-to-db", Tier::Web, "security-group.web", 5432))
            .unwrap();

        let report = check(&graph);
        assert_eq!(rules(&report), vec!["egress-chain"]);
        assert_eq!(
            report.violations[0].resource,
            "security-group-rule.web-to-db"
        );
    }

    #[test]
    fn test_app_egress_off_database_port() {
        let (mut graph, _) = synthesize(&topology()).unwrap();
        graph
            .add(egress_rule("app-https", Tier::App, "security-group.app", 443))
            .unwrap();

        let report = check(&graph);
        assert_eq!(rules(&report), vec!["egress-chain"]);
        assert!(report.violations[0].message.contains("443-443"));
    }

    #[test]
    fn test_web_target_port_egress_must_stay_in_group() {
        let (mut graph, _) = synthesize(&topology()).unwrap();
        // target port, but towards the private ranges instead of the web group
        graph
            .add(egress_rule("web-wide", Tier::Web, "security-group.web", 80))
            .unwrap();

        let report = check(&graph);
        assert_eq!(rules(&report), vec!["egress-chain"]);
    }

    #[test]
    fn test_public_subnet_without_internet_route() {
        let (mut graph, _) = synthesize(&topology()).unwrap();
        graph
            .add(
                Resource::new(ResourceKind::Subnet, "public-x", Tier::Network)
                    .with("visibility", json!("public"))
                    .with("zone", json!("a"))
                    .with("cidr", json!("10.0.3.0/24"))
                    .bind("network", OutputRef::new("network.main", "id")),
            )
            .unwrap();

        let report = check(&graph);
        assert_eq!(rules(&report), vec!["public-subnet-route"]);
        assert_eq!(report.violations[0].resource, "subnet.public-x");
    }

    #[test]
    fn test_private_subnet_with_internet_route() {
        let (mut graph, _) = synthesize(&topology()).unwrap();
        graph
            .add(
                Resource::new(ResourceKind::RouteTable, "leak", Tier::Network)
                    .with("destination", json!("0.0.0.0/0"))
                    .bind("gateway", OutputRef::new("internet-gateway.main", "id"))
                    .bind_all("subnets", vec![OutputRef::new("subnet.private-a", "id")]),
            )
            .unwrap();

        let report = check(&graph);
        assert_eq!(rules(&report), vec!["private-subnet-egress"]);
        assert_eq!(report.violations[0].resource, "subnet.private-a");
    }

    #[test]
    fn test_internet_facing_app_balancer() {
        let (mut graph, _) = synthesize(&topology()).unwrap();
        graph
            .add(
                Resource::new(ResourceKind::LoadBalancer, "app-public", Tier::App)
                    .with("scheme", json!("internet-facing"))
                    .bind_all(
                        "subnets",
                        vec![
                            OutputRef::new("subnet.private-a", "id"),
                            OutputRef::new("subnet.private-c", "id"),
                        ],
                    ),
            )
            .unwrap();

        let report = check(&graph);
        assert_eq!(rules(&report), vec!["lb-exposure"]);
    }

    #[test]
    fn test_single_zone_fails_zone_span() {
        let mut topology = topology();
        topology.network.zones.truncate(1);
        let (graph, _) = synthesize(&topology).unwrap();

        let report = check(&graph);
        let spans: Vec<_> = report
            .violations
            .iter()
            .filter(|v| v.rule == "zone-span")
            .map(|v| v.resource.as_str())
            .collect();
        assert!(spans.contains(&"load-balancer.web"));
        assert!(spans.contains(&"auto-scaling-group.app"));
        assert!(spans.contains(&"db-subnet-group.main"));
        assert!(matches!(
            report.into_result(),
            Err(CloudError::PolicyViolation(_))
        ));
    }
}
