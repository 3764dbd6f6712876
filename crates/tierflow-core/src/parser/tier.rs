//! Parsing of the web and app sections

use super::value::{int_arg, int_args, named_int, opt_string, string_arg, unknown_key};
use crate::error::{Result, TopologyError};
use crate::model::{AppTierSpec, BootstrapScript, FleetSpec, WebTierSpec};
use kdl::KdlNode;

/// Apply a `web { ... }` node onto an existing spec
pub fn apply_web(spec: &mut WebTierSpec, node: &KdlNode) -> Result<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "ports" | "port" => {
                let ports: Vec<u16> = int_args(child)?;
                if ports.is_empty() {
                    return Err(TopologyError::InvalidConfig(
                        "web ports requires at least one port".to_string(),
                    ));
                }
                spec.ports = ports;
            }
            "target-port" | "target_port" => {
                spec.target_port = int_arg(child, 0)?;
            }
            "health-check" | "health_check" => {
                if let Some(path) = opt_string(child) {
                    spec.health_check.path = path;
                }
                if let Some(interval) = named_int(child, "interval")? {
                    spec.health_check.interval = interval;
                }
                if let Some(healthy) = named_int(child, "healthy")? {
                    spec.health_check.healthy_threshold = healthy;
                }
                if let Some(unhealthy) = named_int(child, "unhealthy")? {
                    spec.health_check.unhealthy_threshold = unhealthy;
                }
            }
            _ => {
                if !apply_fleet_key(&mut spec.fleet, child)? {
                    return Err(unknown_key("web", child));
                }
            }
        }
    }

    Ok(())
}

/// Apply an `app { ... }` node onto an existing spec
pub fn apply_app(spec: &mut AppTierSpec, node: &KdlNode) -> Result<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "port" => {
                spec.port = int_arg(child, 0)?;
            }
            _ => {
                if !apply_fleet_key(&mut spec.fleet, child)? {
                    return Err(unknown_key("app", child));
                }
            }
        }
    }

    Ok(())
}

/// Keys shared by every compute fleet. Returns false for keys it does not know.
fn apply_fleet_key(fleet: &mut FleetSpec, node: &KdlNode) -> Result<bool> {
    match node.name().value() {
        "instance-type" | "instance_type" => {
            fleet.instance_type = string_arg(node)?;
        }
        "image" => {
            fleet.image = Some(string_arg(node)?);
        }
        "count" => {
            // count 2 min=2 max=4
            fleet.set_count(int_arg(node, 0)?);
            if let Some(min) = named_int(node, "min")? {
                fleet.min = min;
            }
            if let Some(max) = named_int(node, "max")? {
                fleet.max = max;
            }
        }
        "min" => {
            fleet.min = int_arg(node, 0)?;
        }
        "max" => {
            fleet.max = int_arg(node, 0)?;
        }
        "key-name" | "key_name" => {
            fleet.key_name = Some(string_arg(node)?);
        }
        "bootstrap" | "user-data" | "user_data" => {
            fleet.bootstrap = Some(BootstrapScript::parse(&string_arg(node)?));
            fleet.user_data = None;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(kdl: &str) -> kdl::KdlDocument {
        kdl.parse().unwrap()
    }

    #[test]
    fn test_parse_web() {
        let doc = doc(
            r#"
            web {
                ports 80 443
                target-port 8000
                instance-type "t3.medium"
                image "ami-0123"
                count 3 min=2 max=6
                key-name "ops"
                health-check "/healthz" interval=15 healthy=2 unhealthy=4
                bootstrap "builtin:web"
            }
        "#,
        );
        let mut web = WebTierSpec::default();
        apply_web(&mut web, doc.nodes().first().unwrap()).unwrap();

        assert_eq!(web.ports, vec![80, 443]);
        assert_eq!(web.target_port, 8000);
        assert_eq!(web.fleet.instance_type, "t3.medium");
        assert_eq!(web.fleet.image.as_deref(), Some("ami-0123"));
        assert_eq!((web.fleet.min, web.fleet.desired, web.fleet.max), (2, 3, 6));
        assert_eq!(web.fleet.key_name.as_deref(), Some("ops"));
        assert_eq!(web.health_check.path, "/healthz");
        assert_eq!(web.health_check.interval, 15);
        assert_eq!(web.health_check.healthy_threshold, 2);
        assert_eq!(web.health_check.unhealthy_threshold, 4);
        assert_eq!(
            web.fleet.bootstrap,
            Some(BootstrapScript::Builtin("web".to_string()))
        );
    }

    #[test]
    fn test_parse_app_keeps_unset_fields() {
        let doc = doc(
            r#"
            app {
                port 9000
                image "ami-app"
            }
        "#,
        );
        let mut app = AppTierSpec::default();
        apply_app(&mut app, doc.nodes().first().unwrap()).unwrap();

        assert_eq!(app.port, 9000);
        assert_eq!(app.fleet.image.as_deref(), Some("ami-app"));
        assert_eq!(app.fleet.instance_type, "t3.small");
        assert_eq!(app.fleet.desired, 2);
    }

    #[test]
    fn test_quoted_numbers_from_templates() {
        let doc = doc(r#"app { count "5" }"#);
        let mut app = AppTierSpec::default();
        apply_app(&mut app, doc.nodes().first().unwrap()).unwrap();
        assert_eq!(app.fleet.desired, 5);
    }

    #[test]
    fn test_port_out_of_range() {
        let doc = doc(r#"app { port 70000 }"#);
        let mut app = AppTierSpec::default();
        let err = apply_app(&mut app, doc.nodes().first().unwrap()).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_web_rejects_app_only_keys() {
        let doc = doc(r#"web { balancer "network" }"#);
        let mut web = WebTierSpec::default();
        let err = apply_web(&mut web, doc.nodes().first().unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown key 'balancer' in web"));
    }
}
