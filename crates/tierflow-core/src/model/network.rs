//! Network foundation definition

use crate::cidr::Cidr;
use serde::{Deserialize, Serialize};

/// Virtual network with one public and one private subnet per zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Address range of the whole network
    pub cidr: Option<Cidr>,
    /// Zones in declaration order
    #[serde(default)]
    pub zones: Vec<ZoneSpec>,
    /// NAT gateway placement
    #[serde(default)]
    pub nat: NatMode,
    /// Assign DNS hostnames to instances
    #[serde(default = "default_true")]
    pub dns_hostnames: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            cidr: None,
            zones: Vec::new(),
            nat: NatMode::default(),
            dns_hostnames: true,
        }
    }
}

impl NetworkSpec {
    pub fn zone(&self, name: &str) -> Option<&ZoneSpec> {
        self.zones.iter().find(|z| z.name == name)
    }

    /// Insert a zone, replacing the subnets of an existing zone with the same name.
    pub fn upsert_zone(&mut self, zone: ZoneSpec) {
        if let Some(existing) = self.zones.iter_mut().find(|z| z.name == zone.name) {
            if zone.public.is_some() {
                existing.public = zone.public;
            }
            if zone.private.is_some() {
                existing.private = zone.private;
            }
        } else {
            self.zones.push(zone);
        }
    }

    pub fn zone_names(&self) -> Vec<&str> {
        self.zones.iter().map(|z| z.name.as_str()).collect()
    }
}

/// One availability zone and its subnet pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub name: String,
    pub public: Option<Cidr>,
    pub private: Option<Cidr>,
}

impl ZoneSpec {
    pub fn new(name: impl Into<String>, public: Cidr, private: Cidr) -> Self {
        Self {
            name: name.into(),
            public: Some(public),
            private: Some(private),
        }
    }
}

/// Subnet reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

/// NAT gateway placement for private egress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NatMode {
    /// One NAT gateway in every zone
    #[default]
    PerZone,
    /// A single NAT gateway in the first zone, shared by all private subnets
    Single,
}

impl std::str::FromStr for NatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-zone" | "per_zone" => Ok(NatMode::PerZone),
            "single" => Ok(NatMode::Single),
            other => Err(format!(
                "unknown nat mode '{}' (expected 'per-zone' or 'single')",
                other
            )),
        }
    }
}
