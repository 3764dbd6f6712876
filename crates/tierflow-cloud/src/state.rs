//! State management for provisioned resources
//!
//! One state file per stage under `.tierflow/state/`, recording what the provider
//! created, the spec it was created from and the outputs it reported.

use crate::error::{CloudError, Result};
use crate::graph::{OutputRef, ResourceKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tierflow_core::Tier;
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".tierflow/state";
pub const DEFAULT_STAGE: &str = "default";

/// Everything recorded for one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file version
    pub version: u32,

    #[serde(default)]
    pub stage: Option<String>,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by graph address
    pub resources: BTreeMap<String, ResourceState>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            stage: None,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a resource
    pub fn set_resource(&mut self, address: String, state: ResourceState) {
        self.resources.insert(address, state);
        self.updated_at = Utc::now();
    }

    pub fn remove_resource(&mut self, address: &str) -> Option<ResourceState> {
        let result = self.resources.remove(address);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    pub fn get_resource(&self, address: &str) -> Option<&ResourceState> {
        self.resources.get(address)
    }

    /// Recorded value of an output binding
    pub fn output(&self, reference: &OutputRef) -> Option<&serde_json::Value> {
        self.resources
            .get(&reference.resource)
            .and_then(|r| r.attributes.get(&reference.output))
    }

    /// Addresses in teardown order: dependents before what they depend on
    ///
    /// Uses the dependencies recorded at apply time, so it works without the graph.
    pub fn teardown_order(&self) -> Vec<String> {
        let mut remaining: BTreeMap<&str, Vec<&str>> = self
            .resources
            .iter()
            .map(|(address, r)| {
                let deps = r
                    .dependencies
                    .iter()
                    .map(String::as_str)
                    .filter(|d| self.resources.contains_key(*d))
                    .collect();
                (address.as_str(), deps)
            })
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            // a resource can go once nothing still standing depends on it
            let ready: Vec<&str> = remaining
                .keys()
                .copied()
                .filter(|candidate| {
                    !remaining
                        .values()
                        .any(|deps| deps.contains(candidate))
                })
                .collect();

            // corrupted state with a cycle: fall back to address order
            let batch = if ready.is_empty() {
                remaining.keys().copied().collect()
            } else {
                ready
            };
            for address in batch {
                remaining.remove(address);
                order.push(address.to_string());
            }
        }
        order
    }
}

/// State of a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-specific resource ID
    pub id: String,

    pub resource_type: ResourceKind,

    pub tier: Tier,

    pub status: ResourceStatus,

    /// Spec and bindings the resource was last applied from
    pub desired: serde_json::Value,

    /// Addresses this resource depended on when applied
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Outputs reported by the provider
    pub attributes: BTreeMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, resource_type: ResourceKind, tier: Tier) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type,
            tier,
            status: ResourceStatus::Unknown,
            desired: serde_json::Value::Null,
            dependencies: Vec::new(),
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_desired(mut self, desired: serde_json::Value) -> Self {
        self.desired = desired;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, serde_json::Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Creating,
    /// Created or updated successfully
    Ready,
    Deleting,
    Error,
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Creating => write!(f, "creating"),
            ResourceStatus::Ready => write!(f, "ready"),
            ResourceStatus::Deleting => write!(f, "deleting"),
            ResourceStatus::Error => write!(f, "error"),
            ResourceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Reads and writes the state file of one stage
pub struct StateManager {
    project_root: PathBuf,
    stage: String,
    lock_timeout: Duration,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>, stage: Option<&str>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            stage: stage.unwrap_or(DEFAULT_STAGE).to_string(),
            lock_timeout: Duration::hours(1),
        }
    }

    /// Age after which an existing lock is treated as abandoned
    pub fn with_lock_timeout(mut self, minutes: u64) -> Result<Self> {
        self.lock_timeout = i64::try_from(minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .ok_or_else(|| {
                CloudError::InvalidConfig(format!("lock timeout of {} minutes is too long", minutes))
            })?;
        Ok(self)
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(format!("{}.json", self.stage))
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(format!("{}.json.backup", self.stage))
    }

    fn temp_path(&self) -> PathBuf {
        self.state_dir().join(format!("{}.json.tmp", self.stage))
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(format!("{}.lock", self.stage))
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the current state; an absent file is an empty state
    ///
    /// When only the backup is present the backup is loaded.
    pub async fn load(&self) -> Result<GlobalState> {
        let mut path = self.state_path();
        if !path.exists() && self.backup_path().exists() {
            tracing::warn!(stage = %self.stage, "State file missing, recovering from backup");
            path = self.backup_path();
        }
        if !path.exists() {
            tracing::debug!(stage = %self.stage, "State file not found, returning empty state");
            return Ok(GlobalState {
                stage: Some(self.stage.clone()),
                ..GlobalState::new()
            });
        }

        let content = fs::read_to_string(&path).await?;
        let state: GlobalState = serde_json::from_str(&content).map_err(|e| {
            CloudError::StateError(format!("{}: {}", path.display(), e))
        })?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!(resources = state.resources.len(), "Loaded state");
        Ok(state)
    }

    /// Save the state, keeping the previous file as a backup
    ///
    /// The new content is written to a temporary file and renamed over the state
    /// file, so a state file is present at every point.
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let temp = self.temp_path();

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&temp, content).await?;
        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }
        fs::rename(&temp, &path).await?;

        tracing::debug!(resources = state.resources.len(), "Saved state");
        Ok(())
    }

    /// Acquire a lock for exclusive access
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age < self.lock_timeout {
                return Err(CloudError::LockError(format!(
                    "State of stage '{}' is locked by {} since {}",
                    self.stage, lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!(holder = %lock_info.holder, "Removing stale lock");
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!(stage = %self.stage, "Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn recorded(kind: ResourceKind, deps: &[&str]) -> ResourceState {
        ResourceState::new("id", kind, Tier::Network)
            .with_status(ResourceStatus::Ready)
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), Some("dev"));

        let mut state = manager.load().await.unwrap();
        assert_eq!(state.stage.as_deref(), Some("dev"));
        state.set_resource(
            "network.main".to_string(),
            ResourceState::new("vpc-0001", ResourceKind::Network, Tier::Network)
                .with_status(ResourceStatus::Ready)
                .with_attribute("cidr", json!("10.0.0.0/16")),
        );

        manager.save(&state).await.unwrap();
        assert!(temp_dir.path().join(".tierflow/state/dev.json").exists());

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.resources.len(), 1);
        assert_eq!(
            loaded.output(&OutputRef::new("network.main", "cidr")),
            Some(&json!("10.0.0.0/16"))
        );
    }

    #[tokio::test]
    async fn test_stages_are_isolated() {
        let temp_dir = tempdir().unwrap();
        let dev = StateManager::new(temp_dir.path(), Some("dev"));
        let prod = StateManager::new(temp_dir.path(), Some("prod"));

        let mut state = dev.load().await.unwrap();
        state.set_resource("network.main".to_string(), recorded(ResourceKind::Network, &[]));
        dev.save(&state).await.unwrap();

        assert!(prod.load().await.unwrap().resources.is_empty());
        assert_eq!(StateManager::new(temp_dir.path(), None).stage(), "default");
    }

    #[tokio::test]
    async fn test_save_keeps_backup() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), None);

        manager.save(&GlobalState::new()).await.unwrap();
        manager.save(&GlobalState::new()).await.unwrap();
        let dir = temp_dir.path().join(".tierflow/state");
        assert!(dir.join("default.json.backup").exists());
        assert!(dir.join("default.json").exists());
        assert!(!dir.join("default.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_recovers_from_backup() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), Some("dev"));

        let mut state = GlobalState::new();
        state.set_resource(
            "network.main".to_string(),
            recorded(ResourceKind::Network, &[]),
        );
        manager.save(&state).await.unwrap();
        manager.save(&state).await.unwrap();

        std::fs::remove_file(manager.state_path()).unwrap();
        let loaded = manager.load().await.unwrap();
        assert!(loaded.get_resource("network.main").is_some());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), Some("dev"));

        let lock = manager.acquire_lock().await.unwrap();
        let err = manager.acquire_lock().await.err().unwrap();
        assert!(matches!(err, CloudError::LockError(_)));

        lock.release().await.unwrap();
        let again = manager.acquire_lock().await.unwrap();
        drop(again);
        assert!(!temp_dir.path().join(".tierflow/state/dev.lock").exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_replaced() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join(".tierflow/state");
        std::fs::create_dir_all(&dir).unwrap();
        let old = LockInfo {
            holder: "ci".to_string(),
            acquired_at: Utc::now() - Duration::minutes(10),
        };
        std::fs::write(dir.join("dev.lock"), serde_json::to_string(&old).unwrap()).unwrap();

        let strict = StateManager::new(temp_dir.path(), Some("dev"));
        assert!(strict.acquire_lock().await.is_err());

        let lenient = StateManager::new(temp_dir.path(), Some("dev"))
            .with_lock_timeout(5)
            .unwrap();
        assert!(lenient.acquire_lock().await.is_ok());
    }

    #[test]
    fn test_oversized_lock_timeout_is_rejected() {
        for minutes in [u64::MAX, u64::MAX / 2, i64::MAX as u64] {
            let result = StateManager::new("/tmp", None).with_lock_timeout(minutes);
            assert!(matches!(result, Err(CloudError::InvalidConfig(_))));
        }
        assert!(StateManager::new("/tmp", None).with_lock_timeout(7 * 24 * 60).is_ok());
    }

    #[tokio::test]
    async fn test_newer_version_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), None);
        let state = GlobalState {
            version: STATE_VERSION + 1,
            ..GlobalState::new()
        };
        manager.save(&state).await.unwrap();

        let err = manager.load().await.unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_teardown_order_removes_dependents_first() {
        let mut state = GlobalState::new();
        state.set_resource("network.main".into(), recorded(ResourceKind::Network, &[]));
        state.set_resource(
            "subnet.public-a".into(),
            recorded(ResourceKind::Subnet, &["network.main"]),
        );
        state.set_resource(
            "route-table.public".into(),
            recorded(
                ResourceKind::RouteTable,
                &["network.main", "subnet.public-a", "internet-gateway.gone"],
            ),
        );

        let order = state.teardown_order();
        assert_eq!(
            order,
            vec!["route-table.public", "subnet.public-a", "network.main"]
        );
    }
}
