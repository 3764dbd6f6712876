//! Plan and apply
//!
//! Reconciles the resource graph with the recorded state of a stage. Actions run
//! one at a time in dependency order and state is saved after each of them, so a
//! failed run can simply be repeated.

use crate::action::{Action, ActionType, ApplyResult, Plan};
use crate::error::{CloudError, Result};
use crate::graph::{Input, Resource, ResourceGraph};
use crate::outputs::TopologyOutputs;
use crate::policy;
use crate::provider::{CloudProvider, ResourceConfig, ResourceOutputs, RetryConfig};
use crate::state::{GlobalState, ResourceState, ResourceStatus, StateManager};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Diff the graph against recorded state
///
/// Creates and updates follow the graph's topological order; deletes of resources
/// no longer in the graph come last, dependents first.
pub fn plan(graph: &ResourceGraph, state: &GlobalState) -> Result<Plan> {
    let mut actions = Vec::new();

    for address in graph.order()? {
        let resource = graph
            .get(&address)
            .ok_or_else(|| CloudError::ResourceNotFound(address.clone()))?;
        let desired = resource.desired();

        let action = match state.get_resource(&address) {
            None => Action::new(ActionType::Create, address, resource.kind, resource.tier),
            Some(recorded) if recorded.desired != desired => {
                Action::new(ActionType::Update, address, resource.kind, resource.tier)
                    .with_resource_id(&recorded.id)
                    .with_changes(changed_keys(&recorded.desired, &desired))
            }
            Some(recorded) => Action::new(ActionType::NoOp, address, resource.kind, resource.tier)
                .with_resource_id(&recorded.id),
        };
        actions.push(action);
    }

    for address in state.teardown_order() {
        if graph.contains(&address) {
            continue;
        }
        if let Some(recorded) = state.get_resource(&address) {
            actions.push(
                Action::new(
                    ActionType::Delete,
                    address,
                    recorded.resource_type,
                    recorded.tier,
                )
                .with_resource_id(&recorded.id),
            );
        }
    }

    Ok(Plan::new(actions))
}

/// Teardown of everything recorded, dependents first
pub fn destroy_plan(state: &GlobalState) -> Plan {
    let actions = state
        .teardown_order()
        .into_iter()
        .filter_map(|address| {
            let recorded = state.get_resource(&address)?;
            Some(
                Action::new(
                    ActionType::Delete,
                    address,
                    recorded.resource_type,
                    recorded.tier,
                )
                .with_resource_id(&recorded.id),
            )
        })
        .collect();
    Plan::new(actions)
}

/// Spec keys and inputs whose values differ between two `desired` documents
fn changed_keys(recorded: &Value, desired: &Value) -> Vec<String> {
    let mut changed = BTreeSet::new();
    for section in ["spec", "inputs"] {
        let empty = serde_json::Map::new();
        let old = recorded
            .get(section)
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let new = desired
            .get(section)
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        for key in old.keys().chain(new.keys()) {
            if old.get(key) != new.get(key) {
                changed.insert(key.clone());
            }
        }
    }
    changed.into_iter().collect()
}

/// Replace every binding of `resource` with the recorded output it points to
pub fn resolve_config(resource: &Resource, state: &GlobalState) -> Result<ResourceConfig> {
    let mut config = resource.spec.clone();

    for (key, input) in &resource.inputs {
        let lookup = |r: &crate::graph::OutputRef| {
            state
                .output(r)
                .cloned()
                .ok_or_else(|| CloudError::UnresolvedBinding {
                    resource: resource.address.clone(),
                    input: key.clone(),
                    target: r.to_string(),
                })
        };
        let value = match input {
            Input::One(r) => lookup(r)?,
            Input::Many(refs) => Value::Array(refs.iter().map(lookup).collect::<Result<_>>()?),
        };
        config.insert(key.clone(), value);
    }

    Ok(ResourceConfig::new(
        resource.address.clone(),
        resource.kind,
        resource.tier,
        Value::Object(config),
    ))
}

/// Drives a provider against the state of one stage
pub struct Engine {
    provider: Box<dyn CloudProvider>,
    state: StateManager,
    retry: RetryConfig,
}

impl Engine {
    pub fn new(provider: Box<dyn CloudProvider>, state: StateManager) -> Self {
        Self {
            provider,
            state,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> &dyn CloudProvider {
        self.provider.as_ref()
    }

    pub async fn load_state(&self) -> Result<GlobalState> {
        self.state.load().await
    }

    pub async fn plan(&self, graph: &ResourceGraph) -> Result<Plan> {
        let state = self.state.load().await?;
        plan(graph, &state)
    }

    /// Output surface values from recorded state
    pub async fn outputs(&self, outputs: &TopologyOutputs) -> Result<BTreeMap<String, Value>> {
        let state = self.state.load().await?;
        Ok(outputs.collect(&state))
    }

    /// Apply a plan computed for `graph`
    ///
    /// Policy violations, unresolvable bindings and a held lock are reported as
    /// errors before anything is changed. A failing action ends the run; it is
    /// recorded in the returned result together with the skipped remainder.
    #[tracing::instrument(skip_all, fields(provider = self.provider.name(), stage = self.state.stage()))]
    pub async fn apply(&self, graph: &ResourceGraph, plan: &Plan) -> Result<ApplyResult> {
        graph.resolve()?;
        policy::check(graph).into_result()?;
        self.authenticate().await?;

        let lock = self.state.acquire_lock().await?;
        let mut state = self.state.load().await?;
        preflight(graph, plan, &state)?;

        let result = self.run(graph, plan, &mut state).await;
        lock.release().await?;
        result
    }

    /// Delete every recorded resource, dependents first
    #[tracing::instrument(skip_all, fields(provider = self.provider.name(), stage = self.state.stage()))]
    pub async fn destroy(&self) -> Result<ApplyResult> {
        self.authenticate().await?;

        let lock = self.state.acquire_lock().await?;
        let mut state = self.state.load().await?;
        let plan = destroy_plan(&state);

        let result = self.run(&ResourceGraph::new(), &plan, &mut state).await;
        lock.release().await?;
        result
    }

    async fn authenticate(&self) -> Result<()> {
        let auth = self.provider.check_auth().await?;
        if !auth.authenticated {
            return Err(CloudError::AuthenticationFailed(
                auth.error.unwrap_or_else(|| self.provider.name().to_string()),
            ));
        }
        Ok(())
    }

    async fn run(
        &self,
        graph: &ResourceGraph,
        plan: &Plan,
        state: &mut GlobalState,
    ) -> Result<ApplyResult> {
        let started = Instant::now();
        let mut result = ApplyResult::new();
        let mut failed = false;

        for action in plan.changes() {
            if failed {
                result.skipped.push(action.address.clone());
                continue;
            }

            match self.execute(graph, action, state).await {
                Ok(message) => {
                    self.state.save(state).await?;
                    info!(address = %action.address, action = %action.action_type, "{}", message);
                    result.add_success(action.address.clone(), message);
                }
                Err(e) => {
                    error!(address = %action.address, action = %action.action_type, error = %e, "Action failed");
                    result.add_failure(action.address.clone(), e.to_string());
                    failed = true;
                }
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn execute(
        &self,
        graph: &ResourceGraph,
        action: &Action,
        state: &mut GlobalState,
    ) -> Result<String> {
        let address = action.address.as_str();
        match action.action_type {
            ActionType::Create | ActionType::Update => {
                let resource = graph
                    .get(address)
                    .ok_or_else(|| CloudError::ResourceNotFound(address.to_string()))?;
                let config = resolve_config(resource, state)?;

                let (outputs, created_at) = match (action.action_type, state.get_resource(address)) {
                    (ActionType::Update, Some(recorded)) => {
                        let id = recorded.id.clone();
                        let created_at = recorded.created_at;
                        let outputs = self
                            .call_with_retry(address, || self.provider.update(&id, &config))
                            .await?;
                        (outputs, Some(created_at))
                    }
                    _ => {
                        let outputs = self
                            .call_with_retry(address, || self.provider.create(&config))
                            .await?;
                        (outputs, None)
                    }
                };

                let id = provider_id(address, &outputs)?;
                let mut record = ResourceState::new(&id, resource.kind, resource.tier)
                    .with_status(ResourceStatus::Ready)
                    .with_desired(resource.desired())
                    .with_dependencies(
                        resource.dependencies().into_iter().map(String::from).collect(),
                    )
                    .with_attributes(outputs);
                if let Some(created_at) = created_at {
                    record.created_at = created_at;
                }
                state.set_resource(address.to_string(), record);

                Ok(format!("{} {}", past_tense(action.action_type), id))
            }
            ActionType::Delete => {
                let Some(recorded) = state.get_resource(address) else {
                    debug!(address, "Already gone from state");
                    return Ok("already deleted".to_string());
                };
                let (kind, id) = (recorded.resource_type, recorded.id.clone());
                self.call_with_retry(address, || self.provider.delete(kind, &id))
                    .await?;
                state.remove_resource(address);
                Ok(format!("deleted {}", id))
            }
            ActionType::NoOp => Ok(String::new()),
        }
    }

    /// Run a provider call, retrying transient failures with exponential backoff
    async fn call_with_retry<T, F, Fut>(&self, address: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        address,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn provider_id(address: &str, outputs: &ResourceOutputs) -> Result<String> {
    outputs
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| CloudError::ApiError(format!("provider returned no id for {}", address)))
}

fn past_tense(action: ActionType) -> &'static str {
    match action {
        ActionType::Create => "created",
        ActionType::Update => "updated",
        ActionType::Delete => "deleted",
        ActionType::NoOp => "unchanged",
    }
}

/// Every binding of a create or update must be satisfiable from state or from an
/// earlier action of the same plan
fn preflight(graph: &ResourceGraph, plan: &Plan, state: &GlobalState) -> Result<()> {
    let mut produced: HashSet<&str> = HashSet::new();

    for action in plan.changes() {
        if !matches!(action.action_type, ActionType::Create | ActionType::Update) {
            continue;
        }
        let resource = graph
            .get(&action.address)
            .ok_or_else(|| CloudError::ResourceNotFound(action.address.clone()))?;

        for (key, input) in &resource.inputs {
            for source in input.refs() {
                let available = produced.contains(source.resource.as_str())
                    || state.output(source).is_some();
                if !available {
                    return Err(CloudError::UnresolvedBinding {
                        resource: resource.address.clone(),
                        input: key.clone(),
                        target: source.to_string(),
                    });
                }
            }
        }
        produced.insert(action.address.as_str());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::synthesize;
    use crate::graph::ResourceKind;
    use crate::provider::AuthStatus;
    use crate::test_support::topology;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    /// Provider that records calls and fails on request
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
        fail: Arc<Mutex<BTreeMap<String, (u32, bool)>>>,
    }

    impl Recorder {
        fn fail_on(&self, address: &str, times: u32, transient: bool) {
            self.fail
                .lock()
                .unwrap()
                .insert(address.to_string(), (times, transient));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn maybe_fail(&self, address: &str) -> Result<()> {
            let mut fail = self.fail.lock().unwrap();
            if let Some((remaining, transient)) = fail.get_mut(address)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(if *transient {
                    CloudError::Throttled(address.to_string())
                } else {
                    CloudError::ApiError(address.to_string())
                });
            }
            Ok(())
        }

        fn outputs(resource: &ResourceConfig) -> ResourceOutputs {
            resource
                .resource_type
                .outputs()
                .iter()
                .map(|name| {
                    let value = match *name {
                        "id" => json!(format!("{}-id", resource.address)),
                        "instances" => json!([]),
                        other => json!(format!("{}.{}", resource.address, other)),
                    };
                    (name.to_string(), value)
                })
                .collect()
        }
    }

    #[async_trait]
    impl CloudProvider for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn display_name(&self) -> &str {
            "Recorder"
        }

        async fn check_auth(&self) -> Result<AuthStatus> {
            Ok(AuthStatus::ok("test"))
        }

        async fn create(&self, resource: &ResourceConfig) -> Result<ResourceOutputs> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {}", resource.address));
            self.maybe_fail(&resource.address)?;
            Ok(Self::outputs(resource))
        }

        async fn update(&self, _id: &str, resource: &ResourceConfig) -> Result<ResourceOutputs> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("update {}", resource.address));
            self.maybe_fail(&resource.address)?;
            Ok(Self::outputs(resource))
        }

        async fn delete(&self, _kind: ResourceKind, id: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete {}", id));
            Ok(())
        }
    }

    fn engine(root: &std::path::Path, recorder: &Recorder) -> Engine {
        Engine::new(
            Box::new(recorder.clone()),
            StateManager::new(root, Some("dev")),
        )
        .with_retry(RetryConfig::immediate(3))
    }

    #[tokio::test]
    async fn test_first_plan_creates_everything_in_order() {
        let temp_dir = tempdir().unwrap();
        let (graph, _) = synthesize(&topology()).unwrap();
        let engine = engine(temp_dir.path(), &Recorder::default());

        let plan = engine.plan(&graph).await.unwrap();
        assert_eq!(plan.summary().create, graph.len());
        assert_eq!(plan.actions[0].address, "network.main");
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let (graph, outputs) = synthesize(&topology()).unwrap();
        let recorder = Recorder::default();
        let engine = engine(temp_dir.path(), &recorder);

        let plan = engine.plan(&graph).await.unwrap();
        let result = engine.apply(&graph, &plan).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.succeeded.len(), graph.len());

        let again = engine.plan(&graph).await.unwrap();
        assert!(!again.has_changes);

        let values = engine.outputs(&outputs).await.unwrap();
        assert_eq!(values["web_lb_dns_name"], "load-balancer.web.dns_name");
        assert_eq!(values["network_id"], "network.main-id");
    }

    #[tokio::test]
    async fn test_inputs_resolve_from_recorded_outputs() {
        let temp_dir = tempdir().unwrap();
        let (graph, _) = synthesize(&topology()).unwrap();
        let engine = engine(temp_dir.path(), &Recorder::default());

        let plan = engine.plan(&graph).await.unwrap();
        engine.apply(&graph, &plan).await.unwrap();

        let state = engine.load_state().await.unwrap();
        let subnet = graph.get("subnet.public-a").unwrap();
        let config = resolve_config(subnet, &state).unwrap();
        assert_eq!(config.config["network"], "network.main-id");
        assert_eq!(config.config["cidr"], "10.0.1.0/24");
    }

    #[tokio::test]
    async fn test_changed_spec_plans_update() {
        let temp_dir = tempdir().unwrap();
        let mut topology = topology();
        let (graph, _) = synthesize(&topology).unwrap();
        let engine = engine(temp_dir.path(), &Recorder::default());
        let plan = engine.plan(&graph).await.unwrap();
        engine.apply(&graph, &plan).await.unwrap();

        topology.web.fleet.set_count(3);
        let (graph, _) = synthesize(&topology).unwrap();
        let plan = engine.plan(&graph).await.unwrap();

        let updates = plan.actions_by_type(ActionType::Update);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].address, "auto-scaling-group.web");
        assert_eq!(updates[0].changed, vec!["desired"]);
    }

    #[tokio::test]
    async fn test_removed_resources_are_deleted_last() {
        let temp_dir = tempdir().unwrap();
        let mut topology = topology();
        let (graph, _) = synthesize(&topology).unwrap();
        let recorder = Recorder::default();
        let engine = engine(temp_dir.path(), &recorder);
        let plan = engine.plan(&graph).await.unwrap();
        engine.apply(&graph, &plan).await.unwrap();

        topology.network.nat = tierflow_core::NatMode::Single;
        let (graph, _) = synthesize(&topology).unwrap();
        let plan = engine.plan(&graph).await.unwrap();

        let last = plan.actions.last().unwrap();
        assert_eq!(last.action_type, ActionType::Delete);
        assert_eq!(last.address, "nat-gateway.nat-c");
        assert_eq!(plan.summary().update, 1);

        let result = engine.apply(&graph, &plan).await.unwrap();
        assert!(result.is_success());
        assert!(
            recorder
                .calls()
                .contains(&"delete nat-gateway.nat-c-id".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_apply_resumes() {
        let temp_dir = tempdir().unwrap();
        let (graph, _) = synthesize(&topology()).unwrap();
        let recorder = Recorder::default();
        recorder.fail_on("security-group.app", 1, false);
        let engine = engine(temp_dir.path(), &recorder);

        let plan = engine.plan(&graph).await.unwrap();
        let result = engine.apply(&graph, &plan).await.unwrap();
        assert!(!result.is_success());
        assert_eq!(result.failed[0].address, "security-group.app");
        assert!(!result.skipped.is_empty());

        let state = engine.load_state().await.unwrap();
        assert!(state.get_resource("network.main").is_some());
        assert!(state.get_resource("security-group.app").is_none());

        let resumed = engine.plan(&graph).await.unwrap();
        assert_eq!(resumed.summary().create, result.skipped.len() + 1);
        let result = engine.apply(&graph, &resumed).await.unwrap();
        assert!(result.is_success());
        assert!(!engine.plan(&graph).await.unwrap().has_changes);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let temp_dir = tempdir().unwrap();
        let (graph, _) = synthesize(&topology()).unwrap();
        let recorder = Recorder::default();
        recorder.fail_on("network.main", 2, true);
        let engine = engine(temp_dir.path(), &recorder);

        let plan = engine.plan(&graph).await.unwrap();
        let result = engine.apply(&graph, &plan).await.unwrap();
        assert!(result.is_success());

        let attempts = recorder
            .calls()
            .iter()
            .filter(|c| *c == "create network.main")
            .count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retries_stop_at_max_attempts() {
        let temp_dir = tempdir().unwrap();
        let (graph, _) = synthesize(&topology()).unwrap();
        let recorder = Recorder::default();
        recorder.fail_on("network.main", 5, true);
        let engine = engine(temp_dir.path(), &recorder);

        let plan = engine.plan(&graph).await.unwrap();
        let result = engine.apply(&graph, &plan).await.unwrap();
        assert!(!result.is_success());
        assert_eq!(result.failed[0].address, "network.main");
        assert_eq!(recorder.calls(), vec!["create network.main"; 3]);
    }

    #[tokio::test]
    async fn test_unresolvable_binding_fails_before_any_call() {
        let temp_dir = tempdir().unwrap();
        let (graph, _) = synthesize(&topology()).unwrap();
        let recorder = Recorder::default();
        let engine = engine(temp_dir.path(), &recorder);

        let mut plan = engine.plan(&graph).await.unwrap();
        plan.actions.retain(|a| a.address != "network.main");

        let err = engine.apply(&graph, &plan).await.unwrap_err();
        assert!(matches!(err, CloudError::UnresolvedBinding { .. }));
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_policy_violation_blocks_apply() {
        let temp_dir = tempdir().unwrap();
        let mut topology = topology();
        topology.network.zones.truncate(1);
        let (graph, _) = synthesize(&topology).unwrap();
        let recorder = Recorder::default();
        let engine = engine(temp_dir.path(), &recorder);

        let plan = engine.plan(&graph).await.unwrap();
        let err = engine.apply(&graph, &plan).await.unwrap_err();
        assert!(matches!(err, CloudError::PolicyViolation(_)));
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_removes_dependents_first() {
        let temp_dir = tempdir().unwrap();
        let (graph, _) = synthesize(&topology()).unwrap();
        let recorder = Recorder::default();
        let engine = engine(temp_dir.path(), &recorder);
        let plan = engine.plan(&graph).await.unwrap();
        engine.apply(&graph, &plan).await.unwrap();

        let result = engine.destroy().await.unwrap();
        assert!(result.is_success());
        assert!(engine.load_state().await.unwrap().resources.is_empty());

        let deletes: Vec<String> = recorder
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("delete"))
            .collect();
        let pos = |id: &str| deletes.iter().position(|c| c.ends_with(id)).unwrap();
        assert_eq!(deletes.len(), graph.len());
        assert!(pos("subnet.public-a-id") < pos("network.main-id"));
        assert!(pos("database.main-id") < pos("db-subnet-group.main-id"));
        assert!(pos("security-group-rule.app-ingress-8080-id") < pos("security-group.web-id"));
    }

    #[tokio::test]
    async fn test_held_lock_blocks_apply() {
        let temp_dir = tempdir().unwrap();
        let (graph, _) = synthesize(&topology()).unwrap();
        let engine = engine(temp_dir.path(), &Recorder::default());
        let plan = engine.plan(&graph).await.unwrap();

        let _lock = StateManager::new(temp_dir.path(), Some("dev"))
            .acquire_lock()
            .await
            .unwrap();
        let err = engine.apply(&graph, &plan).await.unwrap_err();
        assert!(matches!(err, CloudError::LockError(_)));
    }
}
