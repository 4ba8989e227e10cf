//! Document model of an acquisition run.
//!
//! A run is delivered as an ordered stream of `(kind, payload)` pairs:
//!
//! ```text
//! start (1)
//!    │
//!    ├── descriptor (1+, one per data stream)
//!    │       │
//!    │       └── event_page / event (N, batched measurements)
//!    │
//! stop (1)
//! ```
//!
//! Payloads are JSON mappings. Required fields are typed; everything else is
//! kept as classified [`MetaValue`]s so it can be materialized verbatim.

use crate::error::{ExportError, ExportResult};
use crate::value::{Mapping, MetaValue};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Run-start document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStart {
    /// Run uid.
    pub uid: String,
    /// Start time, seconds since the Unix epoch.
    pub time: f64,
    /// Every other field of the document.
    #[serde(flatten)]
    pub metadata: Mapping,
}

impl RunStart {
    /// Start document with the two required fields.
    pub fn new(uid: impl Into<String>, time: f64) -> Self {
        Self {
            uid: uid.into(),
            time,
            metadata: Mapping::new(),
        }
    }

    /// Add a metadata field.
    pub fn with(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Optional session label used in entry names.
    pub fn session_name(&self) -> Option<&str> {
        self.metadata.get("session_name").and_then(MetaValue::as_str)
    }

    /// All fields, `uid` and `time` included.
    pub fn to_mapping(&self) -> Mapping {
        let mut fields = self.metadata.clone();
        fields.insert("uid".to_string(), MetaValue::text(self.uid.clone()));
        fields.insert("time".to_string(), MetaValue::float(self.time));
        fields
    }
}

/// Stream descriptor document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Descriptor uid; event pages reference it.
    pub uid: String,
    /// Stream name (`primary`, `baseline`, ...).
    pub name: String,
    /// Per-column schema (`units`, `dtype`, `shape`, `source`, ...).
    #[serde(default)]
    pub data_keys: BTreeMap<String, Mapping>,
    /// Uid of the owning run.
    #[serde(default)]
    pub run_start: Option<String>,
    /// Creation time.
    #[serde(default)]
    pub time: Option<f64>,
}

impl Descriptor {
    /// Descriptor with no columns.
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            data_keys: BTreeMap::new(),
            run_start: None,
            time: None,
        }
    }
}

/// A batch of events of one stream, stored column-wise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    /// Descriptor uid of the stream.
    pub descriptor: String,
    /// Per-record timestamps.
    pub time: Vec<f64>,
    /// Column name → per-record values.
    #[serde(default)]
    pub data: BTreeMap<String, Vec<MetaValue>>,
    /// Per-record sequence numbers.
    #[serde(default)]
    pub seq_num: Vec<i64>,
    /// Per-record event uids.
    #[serde(default)]
    pub uid: Vec<String>,
}

impl EventPage {
    /// Page with timestamps and no columns.
    pub fn new(descriptor: impl Into<String>, time: Vec<f64>) -> Self {
        Self {
            descriptor: descriptor.into(),
            time,
            data: BTreeMap::new(),
            seq_num: Vec::new(),
            uid: Vec::new(),
        }
    }
}

/// A single event; routed as a one-record page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Descriptor uid of the stream.
    pub descriptor: String,
    /// Event time.
    pub time: f64,
    /// Column name → value.
    #[serde(default)]
    pub data: Mapping,
    /// Sequence number.
    #[serde(default)]
    pub seq_num: Option<i64>,
    /// Event uid.
    #[serde(default)]
    pub uid: Option<String>,
}

impl From<Event> for EventPage {
    fn from(event: Event) -> Self {
        EventPage {
            descriptor: event.descriptor,
            time: vec![event.time],
            data: event.data.into_iter().map(|(k, v)| (k, vec![v])).collect(),
            seq_num: event.seq_num.into_iter().collect(),
            uid: event.uid.into_iter().collect(),
        }
    }
}

/// Run-stop document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStop {
    /// Stop time, seconds since the Unix epoch.
    pub time: f64,
    /// `success`, `abort` or `fail`.
    #[serde(default)]
    pub exit_status: Option<String>,
    /// Uid of the owning run.
    #[serde(default)]
    pub run_start: Option<String>,
}

impl RunStop {
    /// Stop document at `time`.
    pub fn new(time: f64) -> Self {
        Self {
            time,
            exit_status: None,
            run_start: None,
        }
    }
}

/// One document of the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// Run start.
    Start(RunStart),
    /// Stream descriptor.
    Descriptor(Descriptor),
    /// Batched events.
    EventPage(EventPage),
    /// Single event.
    Event(Event),
    /// Run stop.
    Stop(RunStop),
    /// Any other kind (`resource`, `datum`, ...); not materialized.
    Other(String),
}

impl Document {
    /// Kind discriminator as used on the wire.
    pub fn kind(&self) -> &str {
        match self {
            Document::Start(_) => "start",
            Document::Descriptor(_) => "descriptor",
            Document::EventPage(_) => "event_page",
            Document::Event(_) => "event",
            Document::Stop(_) => "stop",
            Document::Other(kind) => kind,
        }
    }

    /// Decode a `(kind, payload)` pair.
    pub fn from_pair(kind: &str, payload: serde_json::Value) -> ExportResult<Self> {
        Ok(match kind {
            "start" => Document::Start(decode(kind, payload)?),
            "descriptor" => Document::Descriptor(decode(kind, payload)?),
            "event_page" => Document::EventPage(decode(kind, payload)?),
            "event" => Document::Event(decode(kind, payload)?),
            "stop" => Document::Stop(decode(kind, payload)?),
            other => Document::Other(other.to_string()),
        })
    }

    /// Decode one `[kind, payload]` JSON line.
    pub fn from_json_line(line: &str) -> ExportResult<Self> {
        let (kind, payload): (String, serde_json::Value) = serde_json::from_str(line)?;
        Self::from_pair(&kind, payload)
    }
}

fn decode<T: DeserializeOwned>(kind: &str, payload: serde_json::Value) -> ExportResult<T> {
    serde_json::from_value(payload).map_err(|e| ExportError::malformed(kind, e.to_string()))
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (kind, payload) = <(String, serde_json::Value)>::deserialize(deserializer)?;
        Document::from_pair(&kind, payload).map_err(de::Error::custom)
    }
}
