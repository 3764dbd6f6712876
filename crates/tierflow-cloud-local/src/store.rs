//! JSON-backed resource store
//!
//! Plays the part of the cloud API: it hands out identifiers, remembers what was
//! created and refuses to delete resources that others still reference.

use crate::error::{LocalError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tierflow_cloud::{ResourceKind, ResourceOutputs};
use tokio::fs;
use tokio::sync::Mutex;

/// Config keys holding references to other resources
pub const REFERENCE_KEYS: &[&str] = &[
    "network",
    "subnet",
    "subnets",
    "gateway",
    "security_group",
    "security_groups",
    "peer_security_group",
    "launch_template",
    "subnet_group",
    "load_balancer",
    "target_group",
    "target_groups",
];

/// Outputs other resources may refer to
const REFERABLE_OUTPUTS: &[&str] = &["id", "arn", "name"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResource {
    pub id: String,
    pub kind: ResourceKind,
    /// Graph address the resource was created for
    pub address: String,
    pub config: Value,
    pub outputs: ResourceOutputs,
}

impl StoredResource {
    fn referable(&self) -> impl Iterator<Item = &str> {
        REFERABLE_OUTPUTS
            .iter()
            .filter_map(|key| self.outputs.get(*key).and_then(Value::as_str))
    }

    /// Values of every reference key in the config
    pub fn references(&self) -> Vec<(&'static str, &str)> {
        let mut refs = Vec::new();
        for key in REFERENCE_KEYS {
            match self.config.get(*key) {
                Some(Value::String(value)) => refs.push((*key, value.as_str())),
                Some(Value::Array(values)) => {
                    refs.extend(values.iter().filter_map(Value::as_str).map(|v| (*key, v)))
                }
                _ => {}
            }
        }
        refs
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    pub next_id: u64,
    #[serde(default)]
    pub public_ips: u32,
    /// Resources by provider ID
    pub resources: BTreeMap<String, StoredResource>,
}

impl StoreData {
    /// Next identifier with a kind prefix, e.g. `vpc-00000001`
    pub fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }

    /// Next address from the documentation range
    pub fn allocate_public_ip(&mut self) -> String {
        self.public_ips += 1;
        format!("203.0.113.{}", (self.public_ips - 1) % 254 + 1)
    }

    pub fn get(&self, id: &str) -> Option<&StoredResource> {
        self.resources.get(id)
    }

    /// Resource whose id, arn or name equals `value`
    pub fn find(&self, value: &str) -> Option<&StoredResource> {
        self.resources
            .values()
            .find(|r| r.referable().any(|v| v == value))
    }

    /// Addresses of resources that reference `id`
    pub fn users_of(&self, id: &str) -> Vec<String> {
        let Some(target) = self.resources.get(id) else {
            return Vec::new();
        };
        let names: Vec<&str> = target.referable().collect();

        self.resources
            .values()
            .filter(|r| r.id != id)
            .filter(|r| r.references().iter().any(|(_, v)| names.contains(v)))
            .map(|r| r.address.clone())
            .collect()
    }

    /// Fail when a reference in `config` names nothing in the store
    pub fn check_references(&self, address: &str, config: &Value) -> Result<()> {
        let probe = StoredResource {
            id: String::new(),
            kind: ResourceKind::Network,
            address: address.to_string(),
            config: config.clone(),
            outputs: ResourceOutputs::new(),
        };
        for (field, value) in probe.references() {
            if self.find(value).is_none() {
                return Err(LocalError::UnknownReference {
                    resource: address.to_string(),
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Store contents behind an async lock, written through to a file when opened
/// from one
pub struct Store {
    path: Option<PathBuf>,
    data: Mutex<StoreData>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StoreData::default()),
        }
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content).map_err(|e| LocalError::Store {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            StoreData::default()
        };
        tracing::debug!(path = %path.display(), resources = data.resources.len(), "Opened local store");

        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn snapshot(&self) -> StoreData {
        self.data.lock().await.clone()
    }

    pub async fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> T {
        f(&*self.data.lock().await)
    }

    /// Run a mutation and persist the result; nothing is written when it fails
    pub async fn write<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        let value = f(&mut next)?;
        self.persist(&next).await?;
        *data = next;
        Ok(value)
    }

    async fn persist(&self, data: &StoreData) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, serde_json::to_string_pretty(data)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(id: &str, address: &str, config: Value) -> StoredResource {
        let mut outputs = ResourceOutputs::new();
        outputs.insert("id".to_string(), json!(id));
        StoredResource {
            id: id.to_string(),
            kind: ResourceKind::Subnet,
            address: address.to_string(),
            config,
            outputs,
        }
    }

    #[test]
    fn test_allocate_ids() {
        let mut data = StoreData::default();
        assert_eq!(data.allocate_id("vpc"), "vpc-00000001");
        assert_eq!(data.allocate_id("subnet"), "subnet-00000002");
        assert_eq!(data.allocate_public_ip(), "203.0.113.1");
        assert_eq!(data.allocate_public_ip(), "203.0.113.2");
    }

    #[test]
    fn test_users_and_references() {
        let mut data = StoreData::default();
        data.resources
            .insert("vpc-1".into(), stored("vpc-1", "network.main", json!({})));
        data.resources.insert(
            "subnet-2".into(),
            stored("subnet-2", "subnet.public-a", json!({"network": "vpc-1"})),
        );

        assert_eq!(data.users_of("vpc-1"), vec!["subnet.public-a"]);
        assert!(data.users_of("subnet-2").is_empty());

        assert!(data.check_references("x", &json!({"subnets": ["subnet-2"]})).is_ok());
        let err = data
            .check_references("x", &json!({"subnets": ["subnet-2", "subnet-9"]}))
            .unwrap_err();
        assert!(err.to_string().contains("subnet-9"));
    }

    #[tokio::test]
    async fn test_write_persists_and_reopens() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("local/dev.json");

        let store = Store::open(&path).await.unwrap();
        let id = store.write(|data| Ok(data.allocate_id("vpc"))).await.unwrap();
        assert_eq!(id, "vpc-00000001");
        assert!(path.exists());

        let reopened = Store::open(&path).await.unwrap();
        assert_eq!(reopened.snapshot().await.next_id, 1);
    }

    #[tokio::test]
    async fn test_failed_write_changes_nothing() {
        let store = Store::in_memory();
        let result: Result<()> = store
            .write(|data| {
                data.allocate_id("vpc");
                Err(LocalError::Injected("boom".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.snapshot().await.next_id, 0);
    }
}
