//! Stream registry of one run.
//!
//! Event pages reference their stream by descriptor uid only. The registry
//! resolves that uid to the stream's group and column schema, and keeps the
//! stream namespace unambiguous: a name is bound to exactly one uid.

use crate::container::NodePath;
use crate::error::{ExportError, ExportResult};
use crate::value::Mapping;
use std::collections::{BTreeMap, HashMap};

/// Outcome of [`StreamRegistry::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Neither name nor uid is known; the stream must be created.
    New,
    /// The uid is already registered; nothing to do.
    Registered,
}

#[derive(Debug, Clone)]
struct StreamEntry {
    group: NodePath,
    data_keys: BTreeMap<String, Mapping>,
}

/// Registered streams of the current run.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    streams: HashMap<String, StreamEntry>,
    names: BTreeMap<String, String>,
}

impl StreamRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a descriptor may declare `name` with `uid`.
    ///
    /// Fails with [`ExportError::DuplicateStream`] when the name is bound to
    /// another uid. Does not modify the registry.
    pub fn claim(&self, name: &str, uid: &str) -> ExportResult<Claim> {
        match self.names.get(name) {
            Some(existing) if existing != uid => Err(ExportError::DuplicateStream {
                name: name.to_string(),
                existing_uid: existing.clone(),
            }),
            Some(_) => Ok(Claim::Registered),
            None if self.streams.contains_key(uid) => Ok(Claim::Registered),
            None => Ok(Claim::New),
        }
    }

    /// Bind `uid` to `name`, its group and its column schema.
    pub fn register(
        &mut self,
        uid: &str,
        name: &str,
        group: NodePath,
        data_keys: BTreeMap<String, Mapping>,
    ) -> ExportResult<()> {
        if self.claim(name, uid)? == Claim::Registered {
            return Ok(());
        }
        self.names.insert(name.to_string(), uid.to_string());
        self.streams.insert(
            uid.to_string(),
            StreamEntry {
                group,
                data_keys,
            },
        );
        Ok(())
    }

    /// Group of the stream with descriptor `uid`.
    pub fn group(&self, uid: &str) -> Option<&NodePath> {
        self.streams.get(uid).map(|s| &s.group)
    }

    /// Group of the stream called `name`.
    pub fn group_for_name(&self, name: &str) -> Option<&NodePath> {
        self.names.get(name).and_then(|uid| self.group(uid))
    }

    /// Declared schema of `column` in stream `uid`.
    pub fn schema(&self, uid: &str, column: &str) -> Option<&Mapping> {
        self.streams.get(uid)?.data_keys.get(column)
    }

    /// Whether a stream called `name` is registered.
    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether no stream is registered.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{mapping_from_json, MetaValue};
    use serde_json::json;

    fn keys() -> BTreeMap<String, Mapping> {
        let mut keys = BTreeMap::new();
        keys.insert("x".to_string(), mapping_from_json(json!({"units": "V"})));
        keys
    }

    #[test]
    fn resolves_groups_and_schema() {
        let mut reg = StreamRegistry::new();
        reg.register("d1", "primary", NodePath::parse("/e/data"), keys()).unwrap();
        assert_eq!(reg.group("d1"), Some(&NodePath::parse("/e/data")));
        assert_eq!(reg.group_for_name("primary"), Some(&NodePath::parse("/e/data")));
        assert_eq!(reg.schema("d1", "x").unwrap()["units"], MetaValue::text("V"));
        assert!(reg.schema("d1", "y").is_none());
        assert!(reg.group("unknown").is_none());
    }

    #[test]
    fn same_name_other_uid_is_a_duplicate() {
        let mut reg = StreamRegistry::new();
        reg.register("d1", "baseline", NodePath::parse("/e/data/baseline"), keys()).unwrap();
        let err = reg.claim("baseline", "d2").unwrap_err();
        assert!(matches!(err, ExportError::DuplicateStream { ref existing_uid, .. } if existing_uid == "d1"));
        assert!(reg.register("d2", "baseline", NodePath::root(), keys()).is_err());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn same_uid_again_is_a_no_op() {
        let mut reg = StreamRegistry::new();
        reg.register("d1", "primary", NodePath::parse("/e/data"), keys()).unwrap();
        assert_eq!(reg.claim("primary", "d1").unwrap(), Claim::Registered);
        reg.register("d1", "primary", NodePath::parse("/elsewhere"), BTreeMap::new()).unwrap();
        assert_eq!(reg.group("d1"), Some(&NodePath::parse("/e/data")));
        assert!(reg.schema("d1", "x").is_some());
    }
}
