//! Parsing of the network section

use super::value::{bool_arg, opt_string, string_arg, unknown_key};
use crate::cidr::Cidr;
use crate::error::{Result, TopologyError};
use crate::model::{NatMode, NetworkSpec, ZoneSpec};
use kdl::KdlNode;

/// Apply a `network { ... }` node onto an existing spec
///
/// Only keys present in the node are changed, so override files can adjust a
/// single zone or the NAT mode.
pub fn apply_network(spec: &mut NetworkSpec, node: &KdlNode) -> Result<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "cidr" => {
                spec.cidr = Some(parse_cidr(child)?);
            }
            "nat" => {
                spec.nat = string_arg(child)?
                    .parse::<NatMode>()
                    .map_err(TopologyError::InvalidConfig)?;
            }
            "dns-hostnames" | "dns_hostnames" => {
                spec.dns_hostnames = bool_arg(child)?;
            }
            "zone" => {
                let zone = parse_zone(child)?;
                spec.upsert_zone(zone);
            }
            _ => return Err(unknown_key("network", child)),
        }
    }

    Ok(())
}

/// zone "name" { public "..."; private "..." }
fn parse_zone(node: &KdlNode) -> Result<ZoneSpec> {
    let name = opt_string(node)
        .ok_or_else(|| TopologyError::InvalidConfig("zone requires a name".to_string()))?;

    let mut zone = ZoneSpec {
        name,
        public: None,
        private: None,
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "public" => zone.public = Some(parse_cidr(child)?),
                "private" => zone.private = Some(parse_cidr(child)?),
                _ => return Err(unknown_key("zone", child)),
            }
        }
    }

    Ok(zone)
}

fn parse_cidr(node: &KdlNode) -> Result<Cidr> {
    string_arg(node)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_node(kdl: &str) -> kdl::KdlDocument {
        kdl.parse().unwrap()
    }

    #[test]
    fn test_parse_network() {
        let doc = first_node(
            r#"
            network {
                cidr "10.0.0.0/16"
                nat "single"
                zone "az-a" {
                    public "10.0.1.0/24"
                    private "10.0.11.0/24"
                }
                zone "az-b" {
                    public "10.0.2.0/24"
                    private "10.0.12.0/24"
                }
            }
        "#,
        );
        let mut spec = NetworkSpec::default();
        apply_network(&mut spec, doc.nodes().first().unwrap()).unwrap();

        assert_eq!(spec.cidr.unwrap().to_string(), "10.0.0.0/16");
        assert_eq!(spec.nat, NatMode::Single);
        assert!(spec.dns_hostnames);
        assert_eq!(spec.zone_names(), vec!["az-a", "az-b"]);
        assert_eq!(
            spec.zone("az-b").unwrap().private.unwrap().to_string(),
            "10.0.12.0/24"
        );
    }

    #[test]
    fn test_zone_without_name_is_rejected() {
        let doc = first_node(r#"network { zone { public "10.0.1.0/24" } }"#);
        let mut spec = NetworkSpec::default();
        let err = apply_network(&mut spec, doc.nodes().first().unwrap()).unwrap_err();
        assert!(err.to_string().contains("zone requires a name"));
    }

    #[test]
    fn test_invalid_cidr_is_rejected() {
        let doc = first_node(r#"network { cidr "10.0.0.1/16" }"#);
        let mut spec = NetworkSpec::default();
        let err = apply_network(&mut spec, doc.nodes().first().unwrap()).unwrap_err();
        assert!(matches!(err, TopologyError::InvalidCidr { .. }));
    }

    #[test]
    fn test_unknown_nat_mode() {
        let doc = first_node(r#"network { nat "everywhere" }"#);
        let mut spec = NetworkSpec::default();
        let err = apply_network(&mut spec, doc.nodes().first().unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown nat mode"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let doc = first_node(r#"network { vpn "on" }"#);
        let mut spec = NetworkSpec::default();
        let err = apply_network(&mut spec, doc.nodes().first().unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown key 'vpn' in network"));
    }
}
