//! # daq-nexus
//!
//! Incremental NeXus serializer for acquisition document streams. A run
//! arrives as an ordered stream of start, descriptor, event-page and stop
//! documents; this crate writes it into one `NXentry` of a hierarchical
//! container while the run is still in progress, growing the measured
//! columns as batches arrive.
//!
//! ## Crate Structure
//!
//! - **`serializer`**: the document router. Owns the run state and decides
//!   where each document lands.
//! - **`array_writer`**: creates or grows chunked columns from a batch.
//! - **`materialize`**: renders nested metadata into groups, datasets and
//!   attributes.
//! - **`registry`**: stream uid → group, stream name → uid, column schemas.
//! - **`plot`**: plot bindings, plotting hints and fit result tables.
//! - **`manager`**: path allocation, collision avoidance and artifact
//!   tracking. See `manager::FileManager`.
//! - **`container`**: the storage abstraction, with an in-memory backend and
//!   an HDF5 backend (feature `storage_hdf5`).
//! - **`document`**, **`value`**, **`array`**: the data model.
//! - **`config`**, **`logging`**, **`error`**: configuration via figment,
//!   tracing setup, and the `ExportError` type.
//! - **`export`**: one-call entry points.

pub mod array;
pub mod array_writer;
pub mod config;
pub mod container;
pub mod document;
pub mod environment;
pub mod error;
pub mod export;
pub mod logging;
pub mod manager;
pub mod materialize;
pub mod plot;
pub mod registry;
pub mod serializer;
pub mod template;
pub mod time;
pub mod value;

pub use document::Document;
pub use error::{ExportError, ExportResult};
pub use export::{export, ExportOptions, OutputLocation};
pub use serializer::{Serializer, SerializerOptions};
