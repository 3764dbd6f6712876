//! Entry accessors shared by the section parsers

use crate::error::{Result, TopologyError};
use kdl::{KdlEntry, KdlNode, KdlValue};

/// Positional (unnamed) entries of a node
pub(crate) fn positional(node: &KdlNode) -> impl Iterator<Item = &KdlEntry> {
    node.entries().iter().filter(|e| e.name().is_none())
}

fn key(node: &KdlNode) -> &str {
    node.name().value()
}

/// First positional value as a string, if present
pub(crate) fn opt_string(node: &KdlNode) -> Option<String> {
    positional(node)
        .next()
        .and_then(|e| value_as_string(e.value()))
}

/// First positional value as a string
pub(crate) fn string_arg(node: &KdlNode) -> Result<String> {
    opt_string(node).ok_or_else(|| {
        TopologyError::InvalidConfig(format!("'{}' requires a string value", key(node)))
    })
}

/// Positional value at `index` as an integer
pub(crate) fn int_arg<T: TryFrom<i128>>(node: &KdlNode, index: usize) -> Result<T> {
    let value = positional(node).nth(index).map(|e| e.value()).ok_or_else(|| {
        TopologyError::InvalidConfig(format!("'{}' requires an integer value", key(node)))
    })?;
    convert_int(key(node), value)
}

/// All positional values as integers
pub(crate) fn int_args<T: TryFrom<i128>>(node: &KdlNode) -> Result<Vec<T>> {
    positional(node)
        .map(|e| convert_int(key(node), e.value()))
        .collect()
}

/// Named property (`key=value`) as an integer
pub(crate) fn named_int<T: TryFrom<i128>>(node: &KdlNode, name: &str) -> Result<Option<T>> {
    match node.get(name) {
        Some(value) => convert_int(&format!("{}.{}", key(node), name), value).map(Some),
        None => Ok(None),
    }
}

/// Named property (`key="value"`) as a string
pub(crate) fn named_string(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name).and_then(value_as_string)
}

/// First positional value as a boolean; a bare flag (`multi-zone`) means true
pub(crate) fn bool_arg(node: &KdlNode) -> Result<bool> {
    let Some(entry) = positional(node).next() else {
        return Ok(true);
    };
    let value = entry.value();
    if let Some(b) = value.as_bool() {
        return Ok(b);
    }
    match value.as_string() {
        Some("true" | "yes" | "on") => Ok(true),
        Some("false" | "no" | "off") => Ok(false),
        _ => Err(TopologyError::InvalidConfig(format!(
            "'{}' requires a boolean value",
            key(node)
        ))),
    }
}

/// `name { key "value" ... }` children as string pairs
pub(crate) fn string_map(node: &KdlNode) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let value = opt_string(child).unwrap_or_default();
            pairs.push((child.name().value().to_string(), value));
        }
    }
    pairs
}

pub(crate) fn unknown_key(section: &str, node: &KdlNode) -> TopologyError {
    TopologyError::InvalidConfig(format!(
        "unknown key '{}' in {} section",
        key(node),
        section
    ))
}

fn value_as_string(value: &KdlValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        Some(s.to_string())
    } else {
        value.as_integer().map(|i| i.to_string())
    }
}

// Rendered templates may leave numbers quoted ("{{ count }}" → "4"), so numeric
// strings are accepted as integers.
fn convert_int<T: TryFrom<i128>>(key: &str, value: &KdlValue) -> Result<T> {
    let raw = match (value.as_integer(), value.as_string()) {
        (Some(i), _) => Some(i),
        (None, Some(s)) => s.trim().parse::<i128>().ok(),
        _ => None,
    };
    let raw = raw.ok_or_else(|| {
        TopologyError::InvalidConfig(format!("'{}' requires an integer value", key))
    })?;
    T::try_from(raw)
        .map_err(|_| TopologyError::InvalidConfig(format!("'{}' value {} is out of range", key, raw)))
}
