//! Topology validation
//!
//! Checks a loaded topology before anything is synthesized from it. Errors make
//! the topology unusable; warnings flag layouts that work but lose availability.

use crate::cidr::Cidr;
use crate::error::{Result, TopologyError};
use crate::model::{FleetSpec, NatMode, Topology};
use serde::Serialize;
use std::fmt;

/// Number of zones every tier spans
pub const REQUIRED_ZONES: usize = 2;

const MIN_NETWORK_PREFIX: u8 = 16;
const MAX_NETWORK_PREFIX: u8 = 28;
const MAX_SUBNET_PREFIX: u8 = 28;
const MIN_STORAGE_GB: u32 = 20;
const MAX_BACKUP_RETENTION_DAYS: u32 = 35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    /// Dotted location in the topology (`network.zone[a].public`)
    pub field: String,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(Issue {
            severity: Severity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    fn warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(Issue {
            severity: Severity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// `Ok` with the warnings when there is no error
    pub fn into_result(self) -> Result<Vec<Issue>> {
        if self.has_errors() {
            return Err(TopologyError::Validation(
                self.errors().map(|i| i.to_string()).collect(),
            ));
        }
        Ok(self.issues)
    }
}

/// Validate a loaded topology
#[tracing::instrument(skip(topology), fields(project = %topology.name()))]
pub fn validate(topology: &Topology) -> ValidationReport {
    let mut report = ValidationReport::default();

    validate_settings(topology, &mut report);
    validate_network(topology, &mut report);
    validate_ports(topology, &mut report);
    validate_fleet("web", &topology.web.fleet, topology, &mut report);
    validate_fleet("app", &topology.app.fleet, topology, &mut report);
    validate_health_check(topology, &mut report);
    validate_data(topology, &mut report);

    tracing::debug!(
        errors = report.errors().count(),
        warnings = report.warnings().count(),
        "Validation finished"
    );
    report
}

fn validate_settings(topology: &Topology, report: &mut ValidationReport) {
    let settings = &topology.settings;
    if settings.project.trim().is_empty() {
        report.error("project", "project name must not be empty");
    }
    if settings.region.trim().is_empty() {
        report.error("region", "region must not be empty");
    }
    if settings.tags.keys().any(|k| k.trim().is_empty()) {
        report.error("tags", "tag keys must not be empty");
    }
}

fn validate_network(topology: &Topology, report: &mut ValidationReport) {
    let network = &topology.network;

    if network.zones.len() != REQUIRED_ZONES {
        report.error(
            "network.zone",
            format!(
                "exactly {} zones are required, found {}",
                REQUIRED_ZONES,
                network.zones.len()
            ),
        );
    }
    for (i, zone) in network.zones.iter().enumerate() {
        if zone.name.trim().is_empty() {
            report.error("network.zone", "zone name must not be empty");
        }
        if network.zones[..i].iter().any(|z| z.name == zone.name) {
            report.error(
                format!("network.zone[{}]", zone.name),
                "zone names must be distinct",
            );
        }
    }

    let Some(range) = network.cidr else {
        report.error("network.cidr", "network address range is required");
        return;
    };
    if !(MIN_NETWORK_PREFIX..=MAX_NETWORK_PREFIX).contains(&range.prefix()) {
        report.error(
            "network.cidr",
            format!(
                "prefix /{} is outside /{}../{}",
                range.prefix(),
                MIN_NETWORK_PREFIX,
                MAX_NETWORK_PREFIX
            ),
        );
    }

    let mut subnets: Vec<(String, Cidr)> = Vec::new();
    for zone in &network.zones {
        for (kind, cidr) in [("public", zone.public), ("private", zone.private)] {
            let field = format!("network.zone[{}].{}", zone.name, kind);
            let Some(cidr) = cidr else {
                report.error(field, "subnet range is required");
                continue;
            };
            if cidr.prefix() > MAX_SUBNET_PREFIX {
                report.error(
                    &field,
                    format!("{} is smaller than /{}", cidr, MAX_SUBNET_PREFIX),
                );
            }
            if !range.contains(&cidr) {
                report.error(&field, format!("{} is outside the network {}", cidr, range));
            }
            if let Some((other, _)) = subnets.iter().find(|(_, c)| c.overlaps(&cidr)) {
                report.error(&field, format!("{} overlaps {}", cidr, other));
            }
            subnets.push((field, cidr));
        }
    }

    if network.nat == NatMode::Single {
        report.warning(
            "network.nat",
            "a single NAT gateway makes private egress depend on one zone",
        );
    }
}

fn validate_ports(topology: &Topology, report: &mut ValidationReport) {
    let (web_ports, app_port, db_port) = topology.tier_ports();

    if web_ports.is_empty() {
        report.error("web.ports", "at least one public port is required");
    }
    if web_ports.contains(&0) {
        report.error("web.ports", "port 0 is not allowed");
    }
    if !web_ports.contains(&topology.web.target_port) {
        report.error(
            "web.target-port",
            format!(
                "target port {} is not one of the web ports {:?}",
                topology.web.target_port, web_ports
            ),
        );
    }
    if app_port == 0 {
        report.error("app.port", "port 0 is not allowed");
    }
    if db_port == 0 {
        report.error("data.port", "port 0 is not allowed");
    }
    if app_port == db_port {
        report.error(
            "app.port",
            format!("app port {} is also the database port", app_port),
        );
    }
    if web_ports.contains(&app_port) {
        report.error(
            "app.port",
            format!("app port {} is also a web port", app_port),
        );
    }
    if web_ports.contains(&db_port) {
        report.error(
            "data.port",
            format!("database port {} is also a web port", db_port),
        );
    }
}

fn validate_fleet(
    tier: &str,
    fleet: &FleetSpec,
    topology: &Topology,
    report: &mut ValidationReport,
) {
    if fleet.instance_type.trim().is_empty() {
        report.error(format!("{}.instance-type", tier), "must not be empty");
    }
    if fleet.image.as_deref().is_none_or(|i| i.trim().is_empty()) {
        report.error(format!("{}.image", tier), "machine image is required");
    }
    if !(fleet.min <= fleet.desired && fleet.desired <= fleet.max) {
        report.error(
            format!("{}.count", tier),
            format!(
                "expected min <= desired <= max, got {} <= {} <= {}",
                fleet.min, fleet.desired, fleet.max
            ),
        );
    }

    let zones = topology.network.zones.len() as u32;
    if fleet.desired < zones {
        report.error(
            format!("{}.count", tier),
            format!(
                "desired count {} cannot place an instance in each of {} zones",
                fleet.desired, zones
            ),
        );
    } else if fleet.min < zones {
        report.warning(
            format!("{}.count", tier),
            format!(
                "min {} lets the fleet shrink below one instance per zone",
                fleet.min
            ),
        );
    }
}

fn validate_health_check(topology: &Topology, report: &mut ValidationReport) {
    let check = &topology.web.health_check;
    if !check.path.starts_with('/') {
        report.error("web.health-check", "path must start with '/'");
    }
    for (name, value) in [
        ("healthy", check.healthy_threshold),
        ("unhealthy", check.unhealthy_threshold),
    ] {
        if !(2..=10).contains(&value) {
            report.error(
                "web.health-check",
                format!("{} threshold {} is outside 2..=10", name, value),
            );
        }
    }
    if !(5..=300).contains(&check.interval) {
        report.error(
            "web.health-check",
            format!("interval {} is outside 5..=300 seconds", check.interval),
        );
    }
}

fn validate_data(topology: &Topology, report: &mut ValidationReport) {
    let data = &topology.data;
    if data.class.trim().is_empty() {
        report.error("data.class", "must not be empty");
    }
    if data.storage_gb < MIN_STORAGE_GB {
        report.error(
            "data.storage",
            format!("{} GiB is below the minimum of {} GiB", data.storage_gb, MIN_STORAGE_GB),
        );
    }
    if let Some(max) = data.max_storage_gb
        && max < data.storage_gb
    {
        report.error(
            "data.storage",
            format!("max {} GiB is below allocated {} GiB", max, data.storage_gb),
        );
    }
    if data.backup_retention_days > MAX_BACKUP_RETENTION_DAYS {
        report.error(
            "data.backup-retention",
            format!(
                "{} days exceeds {} days",
                data.backup_retention_days, MAX_BACKUP_RETENTION_DAYS
            ),
        );
    }
    if !data.multi_zone {
        report.warning(
            "data.multi-zone",
            "the database runs in a single zone and has no standby",
        );
    }
}
