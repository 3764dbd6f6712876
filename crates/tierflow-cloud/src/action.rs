//! Action types for resource reconciliation

use crate::graph::ResourceKind;
use serde::{Deserialize, Serialize};
use tierflow_core::Tier;

/// A planned change to one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,

    /// Graph address (`kind.name`)
    pub address: String,

    pub resource_type: ResourceKind,

    pub tier: Tier,

    /// Provider ID of an existing resource (updates and deletes)
    #[serde(default)]
    pub resource_id: Option<String>,

    /// Top-level keys whose desired value changed (updates only)
    #[serde(default)]
    pub changed: Vec<String>,
}

impl Action {
    pub fn new(
        action_type: ActionType,
        address: impl Into<String>,
        kind: ResourceKind,
        tier: Tier,
    ) -> Self {
        Self {
            action_type,
            address: address.into(),
            resource_type: kind,
            tier,
            resource_id: None,
            changed: Vec::new(),
        }
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn with_changes(mut self, changed: Vec<String>) -> Self {
        self.changed = changed;
        self
    }

    /// One-line description for plan output
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Update if !self.changed.is_empty() => {
                format!("{} ({})", self.address, self.changed.join(", "))
            }
            _ => self.address.clone(),
        }
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    /// No changes needed
    NoOp,
}

impl ActionType {
    /// Plan marker, as in `+ network.main`
    pub fn symbol(&self) -> &'static str {
        match self {
            ActionType::Create => "+",
            ActionType::Update => "~",
            ActionType::Delete => "-",
            ActionType::NoOp => " ",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Result of applying a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    pub succeeded: Vec<ActionResult>,

    pub failed: Vec<ActionResult>,

    /// Actions never attempted because an earlier one failed
    pub skipped: Vec<String>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, address: String, message: String) {
        self.succeeded.push(ActionResult {
            address,
            success: true,
            message,
            error: None,
        });
    }

    pub fn add_failure(&mut self, address: String, error: String) {
        self.failed.push(ActionResult {
            address,
            success: false,
            message: String::new(),
            error: Some(error),
        });
    }
}

/// Result of a single action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub address: String,

    pub success: bool,

    pub message: String,

    pub error: Option<String>,
}

/// Ordered actions that reconcile recorded state with the graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,

    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Actions that touch the provider
    pub fn changes(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type != ActionType::NoOp)
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_summary() {
        let plan = Plan::new(vec![
            Action::new(ActionType::Create, "network.main", ResourceKind::Network, Tier::Network),
            Action::new(ActionType::NoOp, "subnet.public-a", ResourceKind::Subnet, Tier::Network),
            Action::new(ActionType::Update, "database.main", ResourceKind::Database, Tier::Data)
                .with_changes(vec!["spec".to_string()]),
        ]);

        assert!(plan.has_changes);
        assert_eq!(plan.changes().count(), 2);
        assert_eq!(
            plan.summary().to_string(),
            "1 to create, 1 to update, 0 to delete, 1 unchanged"
        );
    }

    #[test]
    fn test_noop_plan_has_no_changes() {
        let plan = Plan::new(vec![Action::new(
            ActionType::NoOp,
            "network.main",
            ResourceKind::Network,
            Tier::Network,
        )]);
        assert!(!plan.has_changes);
        assert!(!Plan::empty().has_changes);
    }

    #[test]
    fn test_update_description_lists_changed_keys() {
        let action = Action::new(ActionType::Update, "database.main", ResourceKind::Database, Tier::Data)
            .with_changes(vec!["class".to_string(), "storage_gb".to_string()]);
        assert_eq!(action.description(), "database.main (class, storage_gb)");
        assert_eq!(action.action_type.symbol(), "~");
    }
}
