//! TierFlow resource graph and provisioning engine
//!
//! Turns a loaded [`tierflow_core::Topology`] into a graph of typed resources,
//! checks the isolation policy on it and reconciles it with recorded state through
//! a [`CloudProvider`].
//!
//! ```text
//! Topology ──synthesize──▶ ResourceGraph ──policy::check──▶ PolicyReport
//!                               │
//!                 plan(graph, state) ──▶ Plan ──Engine::apply──▶ CloudProvider
//!                                                     │
//!                                         .tierflow/state/{stage}.json
//! ```

pub mod action;
pub mod components;
pub mod engine;
pub mod error;
pub mod graph;
pub mod outputs;
pub mod policy;
pub mod provider;
pub mod state;

// Re-exports
pub use action::{Action, ActionResult, ActionType, ApplyResult, Plan, PlanSummary};
pub use components::{AppOutputs, DataOutputs, NetworkOutputs, WebOutputs, synthesize};
pub use engine::{Engine, destroy_plan, plan, resolve_config};
pub use error::{CloudError, Result};
pub use graph::{Input, OutputRef, Resource, ResourceGraph, ResourceKind};
pub use outputs::{OutputBinding, SurfaceOutput, TopologyOutputs};
pub use policy::{PolicyReport, Violation};
pub use provider::{AuthStatus, CloudProvider, ResourceConfig, ResourceOutputs, RetryConfig};
pub use state::{GlobalState, ResourceState, ResourceStatus, StateLock, StateManager};

#[cfg(test)]
pub(crate) mod test_support {
    use tierflow_core::{Settings, Topology, ZoneSpec};

    /// Two-zone topology that passes validation
    pub fn topology() -> Topology {
        let mut topology = Topology {
            settings: Settings::new("shop", "ap-northeast-1"),
            ..Default::default()
        };
        topology.network.cidr = Some("10.0.0.0/16".parse().unwrap());
        topology.network.upsert_zone(ZoneSpec::new(
            "a",
            "10.0.1.0/24".parse().unwrap(),
            "10.0.11.0/24".parse().unwrap(),
        ));
        topology.network.upsert_zone(ZoneSpec::new(
            "c",
            "10.0.2.0/24".parse().unwrap(),
            "10.0.12.0/24".parse().unwrap(),
        ));
        topology.web.fleet.image = Some("ami-web".to_string());
        topology.app.fleet.image = Some("ami-app".to_string());
        topology
    }

    #[test]
    fn test_fixture_is_valid() {
        let report = tierflow_core::validate(&topology());
        assert!(!report.has_errors(), "{:?}", report.issues);
    }
}
