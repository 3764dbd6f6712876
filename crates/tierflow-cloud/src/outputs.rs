//! Output surface of a topology

use crate::components::{AppOutputs, DataOutputs, NetworkOutputs, WebOutputs};
use crate::graph::OutputRef;
use crate::state::GlobalState;
use serde_json::Value;
use std::collections::BTreeMap;

/// Outputs of all four layers, as returned by `synthesize`
#[derive(Debug, Clone)]
pub struct TopologyOutputs {
    pub network: NetworkOutputs,
    pub web: WebOutputs,
    pub app: AppOutputs,
    pub data: DataOutputs,
}

/// Where an output value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputBinding {
    One(OutputRef),
    List(Vec<OutputRef>),
    /// Keyed by zone
    Map(BTreeMap<String, OutputRef>),
}

#[derive(Debug, Clone)]
pub struct SurfaceOutput {
    pub name: &'static str,
    pub description: &'static str,
    pub binding: OutputBinding,
}

impl TopologyOutputs {
    /// Named outputs exposed to operators and downstream tooling
    pub fn surface(&self) -> Vec<SurfaceOutput> {
        let out = |name, description, binding| SurfaceOutput {
            name,
            description,
            binding,
        };
        vec![
            out(
                "network_id",
                "Network identifier",
                OutputBinding::One(self.network.network_id.clone()),
            ),
            out(
                "public_subnet_ids",
                "Public subnet identifiers, one per zone",
                OutputBinding::List(self.network.public_subnets.clone()),
            ),
            out(
                "private_subnet_ids",
                "Private subnet identifiers, one per zone",
                OutputBinding::List(self.network.private_subnets.clone()),
            ),
            out(
                "public_route_table_id",
                "Route table of the public subnets",
                OutputBinding::One(self.network.public_route_table.clone()),
            ),
            out(
                "private_route_table_ids",
                "Private route tables by zone",
                OutputBinding::Map(self.network.private_route_tables.clone()),
            ),
            out(
                "web_lb_dns_name",
                "Public address of the web load balancer",
                OutputBinding::One(self.web.load_balancer_dns.clone()),
            ),
            out(
                "web_security_group_id",
                "Web tier security group",
                OutputBinding::One(self.web.security_group.clone()),
            ),
            out(
                "app_lb_dns_name",
                "Internal address of the app load balancer",
                OutputBinding::One(self.app.load_balancer_dns.clone()),
            ),
            out(
                "app_security_group_id",
                "App tier security group",
                OutputBinding::One(self.app.security_group.clone()),
            ),
            out(
                "db_endpoint",
                "Database connection endpoint",
                OutputBinding::One(self.data.endpoint.clone()),
            ),
            out(
                "db_security_group_id",
                "Data tier security group",
                OutputBinding::One(self.data.security_group.clone()),
            ),
        ]
    }

    /// Values of the output surface from recorded state
    ///
    /// Outputs of resources that were never applied are `null`.
    pub fn collect(&self, state: &GlobalState) -> BTreeMap<String, Value> {
        let value = |r: &OutputRef| state.output(r).cloned().unwrap_or(Value::Null);

        self.surface()
            .into_iter()
            .map(|output| {
                let collected = match &output.binding {
                    OutputBinding::One(r) => value(r),
                    OutputBinding::List(refs) => Value::Array(refs.iter().map(value).collect()),
                    OutputBinding::Map(refs) => Value::Object(
                        refs.iter().map(|(k, r)| (k.clone(), value(r))).collect(),
                    ),
                };
                (output.name.to_string(), collected)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::components::synthesize;
    use crate::graph::ResourceKind;
    use crate::state::{GlobalState, ResourceState};
    use crate::test_support::topology;
    use serde_json::{Value, json};
    use tierflow_core::Tier;

    #[test]
    fn test_surface_names() {
        let (_, outputs) = synthesize(&topology()).unwrap();
        let names: Vec<_> = outputs.surface().iter().map(|o| o.name).collect();
        assert!(names.contains(&"web_lb_dns_name"));
        assert!(names.contains(&"db_endpoint"));
        assert!(names.contains(&"private_route_table_ids"));
        assert_eq!(names.len(), 11);
    }

    #[test]
    fn test_collect_from_partial_state() {
        let (_, outputs) = synthesize(&topology()).unwrap();

        let mut state = GlobalState::new();
        state.set_resource(
            "network.main".to_string(),
            ResourceState::new("vpc-0001", ResourceKind::Network, Tier::Network)
                .with_attribute("id", json!("vpc-0001")),
        );
        state.set_resource(
            "load-balancer.web".to_string(),
            ResourceState::new("lb-0002", ResourceKind::LoadBalancer, Tier::Web)
                .with_attribute("dns_name", json!("shop-web.elb.local")),
        );

        let values = outputs.collect(&state);
        assert_eq!(values["network_id"], "vpc-0001");
        assert_eq!(values["web_lb_dns_name"], "shop-web.elb.local");
        assert_eq!(values["db_endpoint"], Value::Null);
        assert_eq!(values["public_subnet_ids"], json!([null, null]));
        assert_eq!(
            values["private_route_table_ids"].as_object().unwrap().len(),
            2
        );
    }
}
