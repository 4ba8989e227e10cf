//! Recursive metadata materializer.
//!
//! Renders a nested [`MetaValue`] into container nodes:
//!
//! | value                          | written as                                   |
//! |--------------------------------|----------------------------------------------|
//! | mapping under `key`            | child group `key` (`start` merges into node) |
//! | sequence of mappings           | groups `key_0`, `key_1`, ...                 |
//! | sequence containing text       | fixed-width text dataset `key`               |
//! | other storable sequence        | typed dataset `key`                          |
//! | unstorable sequence            | text attribute `key` (rendered value)        |
//! | empty sequence, null           | nothing                                      |
//! | scalar                         | scalar dataset `key`                         |
//! | non-mapping at the top         | attribute `value`                            |
//!
//! A key containing `/` addresses a nested node (`"limits/low"` writes
//! `limits/low`), and missing intermediate groups are created.
//!
//! Embedded run-start/run-stop records are flattened first, with their `time`
//! rendered as ISO-8601 text. Mapping keys are ordered, so the same input
//! always produces the same layout.

use crate::array::Array;
use crate::container::{Container, NodePath};
use crate::error::ExportResult;
use crate::time::iso8601;
use crate::value::{Mapping, MetaValue};
use tracing::{debug, warn};

/// Reserved key whose mapping is merged into the current node.
const MERGE_KEY: &str = "start";

/// Materialize `value` under `node`.
pub fn materialize(container: &mut dyn Container, node: &NodePath, value: &MetaValue) -> ExportResult<()> {
    let mapping = match value {
        MetaValue::Mapping(m) => m.clone(),
        MetaValue::Record(_, m) => flatten_record(m),
        other => {
            if let Some(array) = value_array(other) {
                container.set_attr(node, "value", &array)?;
            }
            return Ok(());
        }
    };
    materialize_mapping(container, node, &mapping)
}

/// Materialize each pair of `mapping` under `node`.
pub fn materialize_mapping(container: &mut dyn Container, node: &NodePath, mapping: &Mapping) -> ExportResult<()> {
    for (key, value) in mapping {
        materialize_pair(container, node, key, value)?;
    }
    Ok(())
}

fn materialize_pair(container: &mut dyn Container, node: &NodePath, key: &str, value: &MetaValue) -> ExportResult<()> {
    match value {
        MetaValue::Null => Ok(()),
        MetaValue::Mapping(m) => materialize_child(container, node, key, m),
        MetaValue::Record(_, m) => materialize_child(container, node, key, &flatten_record(m)),
        MetaValue::Scalar(s) => {
            let path = key_path(container, node, key)?;
            container.write_dataset(&path, &Array::scalar(s))
        }
        MetaValue::Sequence(items) => materialize_sequence(container, node, key, items, value),
    }
}

fn materialize_child(container: &mut dyn Container, node: &NodePath, key: &str, mapping: &Mapping) -> ExportResult<()> {
    if key == MERGE_KEY {
        return materialize_mapping(container, node, mapping);
    }
    let child = key_path(container, node, key)?;
    container.require_group(&child)?;
    materialize_mapping(container, &child, mapping)
}

fn materialize_sequence(
    container: &mut dyn Container,
    node: &NodePath,
    key: &str,
    items: &[MetaValue],
    whole: &MetaValue,
) -> ExportResult<()> {
    if items.is_empty() {
        debug!(node = %node, key, "Skipping empty sequence");
        return Ok(());
    }

    if items.iter().all(MetaValue::is_mapping) {
        for (index, item) in items.iter().enumerate() {
            let child = key_path(container, node, &format!("{key}_{index}"))?;
            container.require_group(&child)?;
            materialize(container, &child, item)?;
        }
        return Ok(());
    }

    let array = if items.iter().any(MetaValue::is_text) {
        Array::from_values_as_text(items)
    } else {
        Array::from_values(items)
    };
    match array {
        Some(array) => {
            let path = key_path(container, node, key)?;
            container.write_dataset(&path, &array)
        }
        None => {
            warn!(node = %node, key, "Sequence has no typed layout, storing it as text");
            container.set_attr(node, key, &Array::text(whole.to_string()))
        }
    }
}

/// Node addressed by `key` under `node`.
///
/// A key holding `/` names a nested node, like a path given to HDF5; the
/// intermediate groups are created when missing. Empty components are
/// skipped, and a key with no component at all addresses `node/_`.
fn key_path(container: &mut dyn Container, node: &NodePath, key: &str) -> ExportResult<NodePath> {
    let mut parts: Vec<&str> = key.split('/').filter(|part| !part.is_empty()).collect();
    let Some(leaf) = parts.pop() else {
        warn!(node = %node, key, "Metadata key has no name, storing it as '_'");
        return Ok(node.join("_"));
    };
    let mut parent = node.clone();
    for part in parts {
        parent = parent.join(part);
        container.require_group(&parent)?;
    }
    Ok(parent.join(leaf))
}

/// Flatten an embedded run document, rendering its `time` as ISO-8601 text.
pub fn flatten_record(fields: &Mapping) -> Mapping {
    let mut flat = fields.clone();
    if let Some(ts) = flat.get("time").and_then(MetaValue::as_f64) {
        flat.insert("time".to_string(), MetaValue::text(iso8601(ts)));
    }
    flat
}

/// Array representation of a value for attributes and verbatim leaves; `None` for nulls.
///
/// Scalars and storable sequences keep their type, everything else is stored
/// as rendered text.
pub fn value_array(value: &MetaValue) -> Option<Array> {
    match value {
        MetaValue::Null => None,
        MetaValue::Scalar(s) => Some(Array::scalar(s)),
        MetaValue::Sequence(items) => {
            Some(Array::from_values(items).unwrap_or_else(|| Array::text(value.to_string())))
        }
        MetaValue::Mapping(_) | MetaValue::Record(..) => Some(Array::text(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::memory::MemoryContainer;
    use crate::value::mapping_from_json;
    use serde_json::json;
    use tracing_test::traced_test;

    fn render(value: serde_json::Value) -> MemoryContainer {
        let mut c = MemoryContainer::new();
        materialize(&mut c, &NodePath::root(), &MetaValue::from(value)).unwrap();
        c
    }

    #[test]
    fn scalars_become_datasets_and_mappings_groups() {
        let c = render(json!({"name": "Jane", "age": 42, "lab": {"room": "B12"}, "none": null}));
        assert_eq!(c.dataset("/name").unwrap().as_text(), Some("Jane"));
        assert_eq!(c.dataset("/age").unwrap().as_ints().unwrap(), &[42]);
        assert!(c.is_group("/lab"));
        assert_eq!(c.dataset("/lab/room").unwrap().as_text(), Some("B12"));
        assert!(c.node("/none").is_none());
    }

    #[test]
    fn start_key_merges_into_node() {
        let c = render(json!({"start": {"uid": "abc"}}));
        assert!(!c.is_group("/start"));
        assert_eq!(c.dataset("/uid").unwrap().as_text(), Some("abc"));
    }

    #[test]
    fn sequences_of_mappings_get_indexed_groups() {
        let c = render(json!({"layers": [{"t": 1.0}, {"t": 2.0}]}));
        assert_eq!(c.children("/"), vec!["layers_0", "layers_1"]);
        assert_eq!(c.dataset("/layers_1/t").unwrap().as_floats().unwrap(), &[2.0]);
    }

    #[test]
    fn sequences_with_text_are_fixed_width() {
        let c = render(json!({"motors": ["m1", "motor_two", 3]}));
        let motors = c.dataset("/motors").unwrap();
        assert_eq!(motors.text_width(), Some(9));
        assert_eq!(motors.as_texts().unwrap(), &["m1", "motor_two", "3"]);
    }

    #[test]
    fn numeric_sequences_keep_their_type() {
        let c = render(json!({"limits": [[0, 1], [2, 3]]}));
        let limits = c.dataset("/limits").unwrap();
        assert_eq!(limits.shape(), &[2, 2]);
        assert_eq!(limits.as_ints().unwrap(), &[0, 1, 2, 3]);
    }

    #[test]
    #[traced_test]
    fn unstorable_sequences_fall_back_to_text_attribute() {
        let c = render(json!({"ragged": [[1, 2], [3]], "holes": [1, null]}));
        assert_eq!(c.attr("/", "ragged").unwrap().as_text(), Some("[[1, 2], [3]]"));
        assert_eq!(c.attr("/", "holes").unwrap().as_text(), Some("[1, None]"));
        assert!(c.node("/ragged").is_none());
        assert!(logs_contain("no typed layout"));
    }

    #[test]
    fn slash_keys_create_nested_groups() {
        let c = render(json!({
            "limits/low": 1.0,
            "limits/high": {"soft": 9.0},
            "axes/names": ["x", "y"],
            "runs/entry": [{"n": 1}],
        }));
        assert!(c.is_group("/limits"));
        assert_eq!(c.dataset("/limits/low").unwrap().as_floats().unwrap(), &[1.0]);
        assert_eq!(c.dataset("/limits/high/soft").unwrap().as_floats().unwrap(), &[9.0]);
        assert_eq!(c.dataset("/axes/names").unwrap().as_texts().unwrap(), &["x", "y"]);
        assert_eq!(c.dataset("/runs/entry_0/n").unwrap().as_ints().unwrap(), &[1]);
    }

    #[test]
    #[traced_test]
    fn slash_only_key_is_stored_as_underscore() {
        let c = render(json!({"/": 3, "a//b": 4}));
        assert_eq!(c.dataset("/_").unwrap().as_ints().unwrap(), &[3]);
        assert_eq!(c.dataset("/a/b").unwrap().as_ints().unwrap(), &[4]);
        assert!(logs_contain("Metadata key has no name"));
    }

    #[test]
    fn empty_sequences_write_nothing() {
        let c = render(json!({"empty": []}));
        assert!(c.children("/").is_empty());
    }

    #[test]
    fn non_mapping_becomes_value_attribute() {
        let mut c = MemoryContainer::new();
        c.create_group(&NodePath::parse("/v")).unwrap();
        materialize(&mut c, &NodePath::parse("/v"), &MetaValue::text("plain")).unwrap();
        assert_eq!(c.attr("/v", "value").unwrap().as_text(), Some("plain"));
    }

    #[test]
    fn records_are_flattened_with_iso_time() {
        let mut meta = Mapping::new();
        meta.insert(
            "previous".to_string(),
            MetaValue::run_stop(mapping_from_json(json!({"time": 1002.0, "exit_status": "success"}))),
        );
        let mut c = MemoryContainer::new();
        materialize(&mut c, &NodePath::root(), &MetaValue::Mapping(meta)).unwrap();
        assert_eq!(c.dataset("/previous/time").unwrap().as_text(), Some(iso8601(1002.0).as_str()));
        assert_eq!(c.dataset("/previous/exit_status").unwrap().as_text(), Some("success"));
    }

    #[test]
    fn materializing_twice_gives_identical_layouts() {
        let value = MetaValue::from(json!({
            "sample": {"name": "Si", "thickness": [1.0, 2.0]},
            "tags": ["a", "b"],
            "runs": [{"id": 1}, {"id": 2}],
            "mixed": [1, {"x": 2}],
        }));
        let mut a = MemoryContainer::new();
        let mut b = MemoryContainer::new();
        a.create_group(&NodePath::parse("/first")).unwrap();
        b.create_group(&NodePath::parse("/other")).unwrap();
        b.create_group(&NodePath::parse("/other/nested")).unwrap();
        materialize(&mut a, &NodePath::parse("/first"), &value).unwrap();
        materialize(&mut b, &NodePath::parse("/other/nested"), &value).unwrap();
        assert_eq!(a.node("/first"), b.node("/other/nested"));
    }

    #[test]
    fn value_array_keeps_types_where_possible() {
        assert_eq!(value_array(&MetaValue::text("V")).unwrap().as_text(), Some("V"));
        assert_eq!(
            value_array(&MetaValue::from(json!([1.0, 2.0]))).unwrap().as_floats().unwrap(),
            &[1.0, 2.0]
        );
        assert!(value_array(&MetaValue::Null).is_none());
        assert_eq!(
            value_array(&MetaValue::from(json!({"a": 1}))).unwrap().as_text(),
            Some("{'a': 1}")
        );
    }
}
