//! Local rehearsal provider implementation

use crate::error::LocalError;
use crate::store::{Store, StoreData, StoredResource};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tierflow_cloud::{
    AuthStatus, CloudError, CloudProvider, ResourceConfig, ResourceKind, ResourceOutputs,
};
use tierflow_core::Cidr;
use tokio::sync::Mutex;

const STORE_DIR: &str = ".tierflow/local";

/// First host offset used for instance addresses inside a subnet
const FIRST_INSTANCE_HOST: u32 = 10;

/// Store file of a stage: `.tierflow/local/{stage}.json`
pub fn store_path(project_root: &Path, stage: &str) -> PathBuf {
    project_root.join(STORE_DIR).join(format!("{}.json", stage))
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Network => "vpc",
        ResourceKind::Subnet => "subnet",
        ResourceKind::InternetGateway => "igw",
        ResourceKind::NatGateway => "nat",
        ResourceKind::RouteTable => "rtb",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::SecurityGroupRule => "sgr",
        ResourceKind::LoadBalancer => "lb",
        ResourceKind::TargetGroup => "tg",
        ResourceKind::Listener => "lsn",
        ResourceKind::LaunchTemplate => "lt",
        ResourceKind::AutoScalingGroup => "asg",
        ResourceKind::DbSubnetGroup => "dbsg",
        ResourceKind::Database => "db",
    }
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    remaining: u32,
    transient: bool,
}

/// Provider that materializes resources into a JSON store instead of a cloud API
///
/// Identifiers, addresses and instance placement are deterministic so that runs
/// can be compared and asserted on.
pub struct LocalProvider {
    store: Store,
    region: String,
    failures: Mutex<HashMap<String, Failure>>,
}

impl LocalProvider {
    /// Provider with an in-memory store
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            store: Store::in_memory(),
            region: region.into(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Provider backed by a store file, created on first write
    pub async fn open(path: impl AsRef<Path>, region: impl Into<String>) -> crate::Result<Self> {
        Ok(Self {
            store: Store::open(path).await?,
            region: region.into(),
            failures: Mutex::new(HashMap::new()),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Make the next `times` calls for `address` fail
    ///
    /// Transient failures surface as throttling and are retried by the engine.
    pub async fn inject_failure(&self, address: &str, times: u32, transient: bool) {
        self.failures.lock().await.insert(
            address.to_string(),
            Failure {
                remaining: times,
                transient,
            },
        );
    }

    /// Everything currently in the store
    pub async fn resources(&self) -> Vec<StoredResource> {
        self.store
            .read(|data| data.resources.values().cloned().collect())
            .await
    }

    pub async fn resource(&self, address: &str) -> Option<StoredResource> {
        self.store
            .read(|data| {
                data.resources
                    .values()
                    .find(|r| r.address == address)
                    .cloned()
            })
            .await
    }

    async fn maybe_fail(&self, address: &str) -> tierflow_cloud::Result<()> {
        let mut failures = self.failures.lock().await;
        if let Some(failure) = failures.get_mut(address)
            && failure.remaining > 0
        {
            failure.remaining -= 1;
            tracing::debug!(address, remaining = failure.remaining, "Injected failure");
            if failure.transient {
                return Err(CloudError::Throttled(format!(
                    "rate exceeded for {}",
                    address
                )));
            }
            return Err(LocalError::Injected(address.to_string()).into());
        }
        Ok(())
    }

    /// Outputs of a resource; `previous` is the stored version on update
    fn outputs(
        &self,
        data: &mut StoreData,
        resource: &ResourceConfig,
        id: &str,
        previous: Option<&StoredResource>,
    ) -> crate::Result<ResourceOutputs> {
        let config = &resource.config;
        let field = |name: &str| -> crate::Result<Value> {
            config
                .get(name)
                .cloned()
                .ok_or_else(|| LocalError::MissingField {
                    resource: resource.address.clone(),
                    field: name.to_string(),
                })
        };
        let text = |name: &str| -> crate::Result<String> {
            Ok(field(name)?.as_str().unwrap_or_default().to_string())
        };

        let mut outputs = ResourceOutputs::new();
        outputs.insert("id".to_string(), json!(id));
        let serial = id.rsplit('-').next().unwrap_or(id);

        match resource.resource_type {
            ResourceKind::Network => {
                outputs.insert("cidr".to_string(), field("cidr")?);
            }
            ResourceKind::Subnet => {
                outputs.insert("cidr".to_string(), field("cidr")?);
                outputs.insert("zone".to_string(), field("zone")?);
            }
            ResourceKind::NatGateway => {
                let ip = match previous.and_then(|p| p.outputs.get("public_ip")) {
                    Some(ip) => ip.clone(),
                    None => json!(data.allocate_public_ip()),
                };
                outputs.insert("public_ip".to_string(), ip);
            }
            ResourceKind::LoadBalancer => {
                let name = text("name")?;
                let internal = config.get("scheme").and_then(Value::as_str) == Some("internal");
                let dns_name = format!(
                    "{}{}-{}.{}.elb.local",
                    if internal { "internal-" } else { "" },
                    name,
                    serial,
                    self.region
                );
                outputs.insert(
                    "arn".to_string(),
                    json!(self.arn("loadbalancer", &name, id)),
                );
                outputs.insert("dns_name".to_string(), json!(dns_name));
            }
            ResourceKind::TargetGroup => {
                outputs.insert(
                    "arn".to_string(),
                    json!(self.arn("targetgroup", &text("name")?, id)),
                );
            }
            ResourceKind::Listener => {
                outputs.insert(
                    "arn".to_string(),
                    json!(self.arn("listener", &text("name")?, id)),
                );
            }
            ResourceKind::LaunchTemplate => {
                let version = previous
                    .and_then(|p| p.outputs.get("latest_version"))
                    .and_then(Value::as_u64)
                    .map_or(1, |v| v + 1);
                outputs.insert("latest_version".to_string(), json!(version));
            }
            ResourceKind::AutoScalingGroup => {
                outputs.insert("name".to_string(), field("name")?);
                let instances = self.place_instances(data, resource)?;
                outputs.insert("instances".to_string(), Value::Array(instances));
            }
            ResourceKind::DbSubnetGroup => {
                outputs.insert("name".to_string(), field("name")?);
            }
            ResourceKind::Database => {
                let port = field("port")?.as_u64().unwrap_or_default();
                let address = format!("{}.{}.{}.rds.local", text("name")?, serial, self.region);
                outputs.insert("endpoint".to_string(), json!(format!("{}:{}", address, port)));
                outputs.insert("address".to_string(), json!(address));
                outputs.insert("port".to_string(), json!(port));
                if config.get("publicly_accessible").and_then(Value::as_bool) == Some(true) {
                    let ip = match previous.and_then(|p| p.outputs.get("public_ip")) {
                        Some(ip) => ip.clone(),
                        None => json!(data.allocate_public_ip()),
                    };
                    outputs.insert("public_ip".to_string(), ip);
                }
            }
            ResourceKind::InternetGateway
            | ResourceKind::RouteTable
            | ResourceKind::SecurityGroup
            | ResourceKind::SecurityGroupRule => {}
        }

        Ok(outputs)
    }

    fn arn(&self, kind: &str, name: &str, id: &str) -> String {
        format!(
            "arn:local:elasticloadbalancing:{}:{}/{}/{}",
            self.region, kind, name, id
        )
    }

    /// Spread the desired instances round-robin over the group's subnets
    fn place_instances(
        &self,
        data: &mut StoreData,
        resource: &ResourceConfig,
    ) -> crate::Result<Vec<Value>> {
        let missing = |field: &str| LocalError::MissingField {
            resource: resource.address.clone(),
            field: field.to_string(),
        };
        let desired = resource
            .get_config::<u32>("desired")
            .ok_or_else(|| missing("desired"))?;
        let subnet_ids = resource
            .get_config::<Vec<String>>("subnets")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("subnets"))?;
        let template_id = resource
            .get_config::<String>("launch_template")
            .ok_or_else(|| missing("launch_template"))?;

        let public_ip = data
            .get(&template_id)
            .and_then(|t| t.config.get("associate_public_ip"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut instances = Vec::new();
        for i in 0..desired {
            let slot = i as usize % subnet_ids.len();
            let subnet_id = &subnet_ids[slot];
            let subnet = data
                .get(subnet_id)
                .ok_or_else(|| LocalError::ResourceNotFound(subnet_id.clone()))?;
            let zone = subnet.outputs.get("zone").cloned().unwrap_or(Value::Null);
            let private_ip = subnet
                .outputs
                .get("cidr")
                .and_then(Value::as_str)
                .and_then(|c| c.parse::<Cidr>().ok())
                .and_then(|c| c.host(FIRST_INSTANCE_HOST + i / subnet_ids.len() as u32))
                .map(|ip| json!(ip.to_string()))
                .unwrap_or(Value::Null);

            let instance_id = data.allocate_id("i");
            let public = if public_ip {
                json!(data.allocate_public_ip())
            } else {
                Value::Null
            };
            instances.push(json!({
                "id": instance_id,
                "zone": zone,
                "subnet": subnet_id,
                "private_ip": private_ip,
                "public_ip": public,
            }));
        }
        Ok(instances)
    }
}

#[async_trait]
impl CloudProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn display_name(&self) -> &str {
        "Local rehearsal"
    }

    async fn check_auth(&self) -> tierflow_cloud::Result<AuthStatus> {
        let location = self
            .store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "memory".to_string());
        Ok(AuthStatus::ok(format!("{} ({})", self.region, location)))
    }

    async fn create(&self, resource: &ResourceConfig) -> tierflow_cloud::Result<ResourceOutputs> {
        self.maybe_fail(&resource.address).await?;

        let outputs = self
            .store
            .write(|data| {
                data.check_references(&resource.address, &resource.config)?;
                let id = data.allocate_id(id_prefix(resource.resource_type));
                let outputs = self.outputs(data, resource, &id, None)?;
                data.resources.insert(
                    id.clone(),
                    StoredResource {
                        id,
                        kind: resource.resource_type,
                        address: resource.address.clone(),
                        config: resource.config.clone(),
                        outputs: outputs.clone(),
                    },
                );
                Ok(outputs)
            })
            .await?;

        tracing::debug!(address = %resource.address, id = ?outputs.get("id"), "Created");
        Ok(outputs)
    }

    async fn update(
        &self,
        id: &str,
        resource: &ResourceConfig,
    ) -> tierflow_cloud::Result<ResourceOutputs> {
        self.maybe_fail(&resource.address).await?;

        let outputs = self
            .store
            .write(|data| {
                let previous = data
                    .get(id)
                    .cloned()
                    .ok_or_else(|| LocalError::ResourceNotFound(id.to_string()))?;
                if previous.kind != resource.resource_type {
                    return Err(LocalError::KindMismatch {
                        id: id.to_string(),
                        expected: resource.resource_type.to_string(),
                        actual: previous.kind.to_string(),
                    });
                }
                data.check_references(&resource.address, &resource.config)?;

                let outputs = self.outputs(data, resource, id, Some(&previous))?;
                data.resources.insert(
                    id.to_string(),
                    StoredResource {
                        config: resource.config.clone(),
                        outputs: outputs.clone(),
                        ..previous
                    },
                );
                Ok(outputs)
            })
            .await?;

        tracing::debug!(address = %resource.address, id, "Updated");
        Ok(outputs)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> tierflow_cloud::Result<()> {
        let address = self
            .store
            .read(|data| data.get(id).map(|r| r.address.clone()))
            .await;
        if let Some(address) = &address {
            self.maybe_fail(address).await?;
        }

        self.store
            .write(|data| {
                let stored = data
                    .get(id)
                    .ok_or_else(|| LocalError::ResourceNotFound(id.to_string()))?;
                if stored.kind != kind {
                    return Err(LocalError::KindMismatch {
                        id: id.to_string(),
                        expected: kind.to_string(),
                        actual: stored.kind.to_string(),
                    });
                }
                let users = data.users_of(id);
                if !users.is_empty() {
                    return Err(LocalError::InUse {
                        id: id.to_string(),
                        users,
                    });
                }
                data.resources.remove(id);
                Ok(())
            })
            .await?;

        tracing::debug!(id, "Deleted");
        Ok(())
    }
}
