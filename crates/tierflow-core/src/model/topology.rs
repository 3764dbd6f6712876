//! Topology definition

use super::data::DataTierSpec;
use super::network::NetworkSpec;
use super::settings::{Backend, Settings};
use super::stage::Stage;
use super::tier::{AppTierSpec, WebTierSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Topology - the whole three-tier layout of one project
///
/// Each section is consumed by one component constructor in dependency order:
/// network → web → app → data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    pub settings: Settings,
    pub network: NetworkSpec,
    pub web: WebTierSpec,
    pub app: AppTierSpec,
    pub data: DataTierSpec,
    /// State backend for the exported configuration
    #[serde(default)]
    pub backend: Option<Backend>,
    /// Stages declared in the project
    #[serde(default)]
    pub stages: HashMap<String, Stage>,
    /// Project-wide variables
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl Topology {
    pub fn name(&self) -> &str {
        &self.settings.project
    }

    /// Ports that belong to each tier, in chain order
    pub fn tier_ports(&self) -> (Vec<u16>, u16, u16) {
        (
            self.web.ports.clone(),
            self.app.port,
            self.data.effective_port(),
        )
    }
}
