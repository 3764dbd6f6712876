//! Project-wide settings shared by every component

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Values every component constructor needs: naming, placement and tagging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Project name, used as the prefix of every resource name
    pub project: String,
    /// Cloud region (e.g. "ap-northeast-1")
    pub region: String,
    /// Stage the topology was loaded for
    #[serde(default)]
    pub stage: Option<String>,
    /// Tags applied to every resource
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Settings {
    pub fn new(project: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    /// Resource name prefix: `{project}` or `{project}-{stage}`
    pub fn prefix(&self) -> String {
        match &self.stage {
            Some(stage) => format!("{}-{}", self.project, stage),
            None => self.project.clone(),
        }
    }

    /// Qualified name for a resource: `{prefix}-{suffix}`
    pub fn resource_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.prefix(), suffix)
    }

    /// Tags for one resource: the shared tags plus `Name`, `Project`, `Stage` and `Tier`.
    pub fn tags_for(&self, name: &str, tier: &str) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        tags.insert("Name".to_string(), name.to_string());
        tags.insert("Project".to_string(), self.project.clone());
        if let Some(stage) = &self.stage {
            tags.insert("Stage".to_string(), stage.clone());
        }
        tags.insert("Tier".to_string(), tier.to_string());
        tags
    }

    /// Fill in tags that the project itself does not set.
    pub fn merge_default_tags(&mut self, defaults: &BTreeMap<String, String>) {
        for (key, value) in defaults {
            self.tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Remote state backend declared for the external provisioning engine
/// (object store + lock table).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub bucket: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub lock_table: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}
