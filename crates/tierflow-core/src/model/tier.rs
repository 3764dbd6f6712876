//! Web and app tier definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Layer of the topology with its own trust boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Network,
    Web,
    App,
    Data,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Network => "network",
            Tier::Web => "web",
            Tier::App => "app",
            Tier::Data => "data",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute fleet: instance template plus scaling bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSpec {
    pub instance_type: String,
    /// Machine image ID
    pub image: Option<String>,
    /// Desired instance count
    pub desired: u32,
    pub min: u32,
    pub max: u32,
    /// SSH key pair name
    #[serde(default)]
    pub key_name: Option<String>,
    /// First-boot script reference
    #[serde(default)]
    pub bootstrap: Option<BootstrapScript>,
    /// Resolved first-boot script content
    #[serde(default)]
    pub user_data: Option<String>,
}

impl FleetSpec {
    pub fn new(instance_type: impl Into<String>) -> Self {
        Self {
            instance_type: instance_type.into(),
            image: None,
            desired: 2,
            min: 2,
            max: 4,
            key_name: None,
            bootstrap: None,
            user_data: None,
        }
    }

    /// Set the desired count, widening the bounds so they still hold it.
    pub fn set_count(&mut self, desired: u32) {
        self.desired = desired;
        if self.min > desired {
            self.min = desired;
        }
        if self.max < desired {
            self.max = desired;
        }
    }
}

/// Where a first-boot script comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum BootstrapScript {
    /// One of the scripts shipped with TierFlow (`builtin:<name>`)
    Builtin(String),
    /// A file, relative to the project root
    File(PathBuf),
}

impl BootstrapScript {
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix("builtin:") {
            Some(name) => BootstrapScript::Builtin(name.to_string()),
            None => BootstrapScript::File(PathBuf::from(value)),
        }
    }
}

impl std::fmt::Display for BootstrapScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapScript::Builtin(name) => write!(f, "builtin:{}", name),
            BootstrapScript::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// HTTP health check of the public load balancer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    /// Seconds between checks
    pub interval: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            interval: 30,
            healthy_threshold: 3,
            unhealthy_threshold: 3,
        }
    }
}

/// Public tier: application load balancer and fleet in the public subnets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebTierSpec {
    /// Ports open to the internet
    pub ports: Vec<u16>,
    /// Instance port the load balancer forwards to
    pub target_port: u16,
    pub fleet: FleetSpec,
    #[serde(default)]
    pub health_check: HealthCheck,
}

impl Default for WebTierSpec {
    fn default() -> Self {
        Self {
            ports: vec![80],
            target_port: 80,
            fleet: FleetSpec::new("t3.micro"),
            health_check: HealthCheck::default(),
        }
    }
}

/// Internal tier: network load balancer and fleet in the private subnets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTierSpec {
    /// Port the app listens on, reachable only from the web tier
    pub port: u16,
    pub fleet: FleetSpec,
}

impl Default for AppTierSpec {
    fn default() -> Self {
        Self {
            port: 8080,
            fleet: FleetSpec::new("t3.small"),
        }
    }
}
