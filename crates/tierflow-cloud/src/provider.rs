//! Cloud provider trait definition

use crate::error::Result;
use crate::graph::ResourceKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tierflow_core::Tier;

/// Attributes a provider reports for a resource; always includes `id`
pub type ResourceOutputs = BTreeMap<String, serde_json::Value>;

/// Cloud provider abstraction trait
///
/// The engine drives a provider one resource at a time, in dependency order.
/// Implementations only translate a resolved resource into API calls.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "local")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Create a resource and report its outputs
    async fn create(&self, resource: &ResourceConfig) -> Result<ResourceOutputs>;

    /// Update a resource in place
    async fn update(&self, id: &str, resource: &ResourceConfig) -> Result<ResourceOutputs>;

    /// Delete a resource by provider ID
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// A resource with every binding replaced by the value it points to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Graph address (`kind.name`)
    pub address: String,

    pub resource_type: ResourceKind,

    pub tier: Tier,

    /// Spec fields merged with resolved inputs
    pub config: serde_json::Value,
}

impl ResourceConfig {
    pub fn new(
        address: impl Into<String>,
        resource_type: ResourceKind,
        tier: Tier,
        config: serde_json::Value,
    ) -> Self {
        Self {
            address: address.into(),
            resource_type,
            tier,
            config,
        }
    }

    /// Get a configuration value as a specific type
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    pub initial_delay: Duration,

    pub max_delay: Duration,

    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (1-based), capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(350));
        assert_eq!(RetryConfig::immediate(3).delay_for(3), Duration::ZERO);
    }

    #[test]
    fn test_get_config() {
        let resource = ResourceConfig::new(
            "subnet.public-a",
            ResourceKind::Subnet,
            Tier::Network,
            json!({"cidr": "10.0.1.0/24", "map_public_ip": true}),
        );
        assert_eq!(
            resource.get_config::<String>("cidr").as_deref(),
            Some("10.0.1.0/24")
        );
        assert_eq!(resource.get_config::<bool>("map_public_ip"), Some(true));
        assert_eq!(resource.get_config::<u16>("port"), None);
    }
}
