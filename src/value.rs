//! Metadata value model.
//!
//! Documents carry arbitrarily nested metadata. Instead of probing values at
//! write time, every JSON value is classified once into [`MetaValue`], a closed
//! variant type. The materializer and the array conversion then match on it
//! exhaustively.
//!
//! ```text
//! MetaValue
//!    ├── Null
//!    ├── Scalar(Bool | Int | Float | Text)
//!    ├── Sequence(Vec<MetaValue>)
//!    ├── Mapping(BTreeMap<String, MetaValue>)
//!    └── Record(RunStart | RunStop, Mapping)
//! ```
//!
//! Mappings are ordered by key, so node layouts produced from them are
//! deterministic.
//!
//! [`MetaValue::Record`] is never produced by `From<serde_json::Value>`: JSON
//! carries no type tag, so a run document nested under a `start` or `stop`
//! key arrives as a plain mapping and keeps its numeric `time`. Callers that
//! build metadata in code mark embedded run documents with
//! [`MetaValue::run_start`] / [`MetaValue::run_stop`] to get the ISO-8601
//! flattening.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered key/value metadata.
pub type Mapping = BTreeMap<String, MetaValue>;

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
}

impl Scalar {
    /// Numeric view of the scalar, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Bool(_) | Scalar::Text(_) => None,
        }
    }

    /// Text as stored in fixed-width byte arrays.
    pub fn to_text(&self) -> String {
        match self {
            Scalar::Bool(true) => "True".to_string(),
            Scalar::Bool(false) => "False".to_string(),
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => format!("{v:?}"),
            Scalar::Text(s) => s.clone(),
        }
    }
}

/// Well-known document records that may appear nested inside metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A run-start document.
    RunStart,
    /// A run-stop document.
    RunStop,
}

/// Classified metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// Absent value; never written.
    Null,
    /// Leaf value.
    Scalar(Scalar),
    /// Ordered list of values.
    Sequence(Vec<MetaValue>),
    /// Nested key/value mapping.
    Mapping(Mapping),
    /// Embedded run document, flattened to a mapping on write. Only built
    /// through [`MetaValue::run_start`] / [`MetaValue::run_stop`].
    Record(RecordKind, Mapping),
}

impl MetaValue {
    /// Text scalar.
    pub fn text(s: impl Into<String>) -> Self {
        MetaValue::Scalar(Scalar::Text(s.into()))
    }

    /// Float scalar.
    pub fn float(v: f64) -> Self {
        MetaValue::Scalar(Scalar::Float(v))
    }

    /// Integer scalar.
    pub fn int(v: i64) -> Self {
        MetaValue::Scalar(Scalar::Int(v))
    }

    /// Embedded run-start record.
    pub fn run_start(fields: Mapping) -> Self {
        MetaValue::Record(RecordKind::RunStart, fields)
    }

    /// Embedded run-stop record.
    pub fn run_stop(fields: Mapping) -> Self {
        MetaValue::Record(RecordKind::RunStop, fields)
    }

    /// Whether this value is a mapping (records count as mappings).
    pub fn is_mapping(&self) -> bool {
        matches!(self, MetaValue::Mapping(_) | MetaValue::Record(..))
    }

    /// Borrow as mapping.
    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            MetaValue::Mapping(m) | MetaValue::Record(_, m) => Some(m),
            _ => None,
        }
    }

    /// Borrow as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Numeric view (integers widen to floats).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Scalar(s) => s.as_f64(),
            _ => None,
        }
    }

    /// Whether this value is a text scalar.
    pub fn is_text(&self) -> bool {
        matches!(self, MetaValue::Scalar(Scalar::Text(_)))
    }

    /// Consume into a mapping, if this value is one.
    pub fn into_mapping(self) -> Option<Mapping> {
        match self {
            MetaValue::Mapping(m) | MetaValue::Record(_, m) => Some(m),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for MetaValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => MetaValue::Null,
            Value::Bool(b) => MetaValue::Scalar(Scalar::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Scalar(Scalar::Int(i)),
                // u64 beyond i64 range and all non-integers land here
                None => MetaValue::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => MetaValue::Scalar(Scalar::Text(s)),
            Value::Array(items) => {
                MetaValue::Sequence(items.into_iter().map(MetaValue::from).collect())
            }
            Value::Object(map) => MetaValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, MetaValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&MetaValue> for serde_json::Value {
    fn from(value: &MetaValue) -> Self {
        use serde_json::Value;
        match value {
            MetaValue::Null => Value::Null,
            MetaValue::Scalar(Scalar::Bool(b)) => Value::Bool(*b),
            MetaValue::Scalar(Scalar::Int(i)) => Value::from(*i),
            MetaValue::Scalar(Scalar::Float(f)) => {
                serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number)
            }
            MetaValue::Scalar(Scalar::Text(s)) => Value::String(s.clone()),
            MetaValue::Sequence(items) => Value::Array(items.iter().map(Value::from).collect()),
            MetaValue::Mapping(m) | MetaValue::Record(_, m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::text(s)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::float(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::int(v)
    }
}

impl From<Mapping> for MetaValue {
    fn from(m: Mapping) -> Self {
        MetaValue::Mapping(m)
    }
}

impl<'de> Deserialize<'de> for MetaValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(MetaValue::from)
    }
}

impl Serialize for MetaValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_json::Value::from(self).serialize(serializer)
    }
}

/// Renders the value as compact text; used when no typed layout exists.
impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Null => write!(f, "None"),
            MetaValue::Scalar(Scalar::Text(s)) => write!(f, "'{s}'"),
            MetaValue::Scalar(s) => write!(f, "{}", s.to_text()),
            MetaValue::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            MetaValue::Mapping(m) | MetaValue::Record(_, m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{k}': {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Build a [`Mapping`] from a JSON object literal.
///
/// Non-object values produce an empty mapping.
pub fn mapping_from_json(value: serde_json::Value) -> Mapping {
    MetaValue::from(value).into_mapping().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_run_documents_from_json_stay_mappings() {
        let v = MetaValue::from(json!({"start": {"uid": "u", "time": 5.0}}));
        let inner = &v.as_mapping().unwrap()["start"];
        assert!(matches!(inner, MetaValue::Mapping(_)));
        assert_eq!(inner.as_mapping().unwrap()["time"], MetaValue::float(5.0));
    }

    #[test]
    fn classifies_json_once() {
        let v = MetaValue::from(json!({
            "a": 1,
            "b": 2.5,
            "c": "x",
            "d": [1, 2],
            "e": null,
            "f": {"g": true}
        }));
        let m = v.as_mapping().unwrap();
        assert_eq!(m["a"], MetaValue::int(1));
        assert_eq!(m["b"], MetaValue::float(2.5));
        assert_eq!(m["c"], MetaValue::text("x"));
        assert!(matches!(m["d"], MetaValue::Sequence(_)));
        assert_eq!(m["e"], MetaValue::Null);
        assert!(m["f"].is_mapping());
    }

    #[test]
    fn mapping_keys_are_ordered() {
        let m = mapping_from_json(json!({"zeta": 1, "alpha": 2, "mid": 3}));
        let keys: Vec<_> = m.keys().cloned().collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn display_renders_nested_values() {
        let v = MetaValue::from(json!([1, "a", null, 2.0]));
        assert_eq!(v.to_string(), "[1, 'a', None, 2.0]");
    }

    #[test]
    fn records_behave_as_mappings() {
        let rec = MetaValue::run_stop(mapping_from_json(json!({"time": 5.0})));
        assert!(rec.is_mapping());
        assert_eq!(rec.as_mapping().unwrap()["time"], MetaValue::float(5.0));
    }
}
