//! Structured patching: parse the whole document, replace one sub-tree,
//! serialize again.
//!
//! Preferred over the text patcher whenever the document parses, since the
//! YAML library handles quoting and escaping. Comments do not survive.

use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::error::{ProvisionError, Result};

/// Parse `text` into a mapping. An empty or null document is an empty mapping.
pub fn parse(text: &str, origin: &Path) -> Result<Mapping> {
    if text.trim().is_empty() {
        return Ok(Mapping::new());
    }
    let value: Value = serde_yaml::from_str(text).map_err(|err| ProvisionError::Parse {
        path: origin.to_path_buf(),
        reason: err.to_string(),
    })?;
    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(mapping) => Ok(mapping),
        other => Err(ProvisionError::ambiguity(
            origin,
            1,
            format!("document root is a {}, expected a mapping", type_name(&other)),
        )),
    }
}

pub fn serialize(doc: &Mapping, origin: &Path) -> Result<String> {
    serde_yaml::to_string(doc).map_err(|err| ProvisionError::Parse {
        path: origin.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Set `path` in `doc` to `value`, replacing whatever was there wholesale.
///
/// Intermediate keys are created as mappings when absent. An intermediate
/// that holds a non-mapping value (for example `network: ~`) is replaced by
/// a mapping.
pub fn merge(mut doc: Mapping, path: &[&str], value: Value) -> Mapping {
    let Some((last, parents)) = path.split_last() else {
        return match value {
            Value::Mapping(mapping) => mapping,
            _ => doc,
        };
    };

    let mut cursor = &mut doc;
    for key in parents {
        let slot = cursor
            .entry(Value::from(*key))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !slot.is_mapping() {
            warn!(key = %key, found = type_name(slot), "replacing non-mapping value with a mapping");
            *slot = Value::Mapping(Mapping::new());
        }
        cursor = match slot {
            Value::Mapping(mapping) => mapping,
            _ => unreachable!("slot was just made a mapping"),
        };
    }
    cursor.insert(Value::from(*last), value);
    doc
}

/// Look up `path` in `doc`.
pub fn lookup<'a>(doc: &'a Mapping, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = doc.get(*first)?;
    for key in rest {
        current = current.as_mapping()?.get(*key)?;
    }
    Some(current)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
