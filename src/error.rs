//! Error types for the serializer.
//!
//! `ExportError` is the single error type returned by every fallible
//! operation in the crate. It is built with `thiserror` so that backend
//! failures (I/O, JSON, configuration, HDF5) convert with `?`.
//!
//! ## Fatal vs. recovered
//!
//! Most variants are fatal to the run that raised them. Two conditions never
//! surface here because they are recovered where they happen:
//!
//! - an event page that references an unknown stream uid is dropped;
//! - a metadata value with no storable representation is written as text.
//!
//! Data written before a fatal error stays on disk. The serializer still
//! closes its files when it goes out of scope.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ExportResult<T> = std::result::Result<T, ExportError>;

/// Primary error type for document serialization.
#[derive(Error, Debug)]
pub enum ExportError {
    /// A descriptor declared a stream name that is already bound to another uid.
    ///
    /// The stream namespace of a run would become ambiguous, so the run stops.
    #[error("Stream '{name}' already exists (bound to descriptor '{existing_uid}')")]
    DuplicateStream {
        /// Stream name declared twice.
        name: String,
        /// Descriptor uid the name was first bound to.
        existing_uid: String,
    },

    /// The file name template could not be rendered from the start document.
    #[error("Failed to format file name template '{template}': {reason}")]
    Template {
        /// Template as configured.
        template: String,
        /// Underlying formatting failure.
        reason: String,
    },

    /// An absolute path was given where a path relative to the output directory is required.
    #[error("'{0}' must be structured like a relative file path")]
    AbsolutePath(PathBuf),

    /// A batch's per-record shape differs from the established column shape.
    #[error("Shape mismatch for '{path}': column records are {expected:?}, batch records are {actual:?}")]
    ShapeMismatch {
        /// Dataset path inside the container.
        path: String,
        /// Per-record shape fixed at first write.
        expected: Vec<usize>,
        /// Per-record shape of the rejected batch.
        actual: Vec<usize>,
    },

    /// A batch's element type cannot be stored in the existing column.
    #[error("Type mismatch for '{path}': column holds {expected}, batch holds {actual}")]
    TypeMismatch {
        /// Dataset path inside the container.
        path: String,
        /// Element kind of the column.
        expected: String,
        /// Element kind of the rejected batch.
        actual: String,
    },

    /// A document is missing a required field or has one of the wrong type.
    #[error("Malformed {kind} document: {reason}")]
    MalformedDocument {
        /// Document kind (`start`, `descriptor`, ...).
        kind: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A document that needs an open run arrived before any start document.
    #[error("No active run: received '{0}' before 'start'")]
    NoActiveRun(String),

    /// The container file was already closed by the manager.
    #[error("Container '{0}' is closed")]
    FileClosed(String),

    /// An option key not recognized by the file layer.
    #[error("Unknown file option '{0}'")]
    UnknownOption(String),

    /// Functionality compiled out via feature flags.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Generic container backend failure (missing node, wrong node kind, ...).
    #[error("Container error: {0}")]
    Container(String),

    /// Configuration file parsing or extraction failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Semantic configuration problem detected by validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding failure on the ingestion side.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure reported by the HDF5 library.
    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

impl ExportError {
    /// Shorthand for [`ExportError::MalformedDocument`].
    pub fn malformed(kind: &str, reason: impl Into<String>) -> Self {
        Self::MalformedDocument {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ExportError {
    fn from(err: figment::Error) -> Self {
        ExportError::Config(Box::new(err))
    }
}
