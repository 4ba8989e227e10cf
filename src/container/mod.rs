//! Hierarchical container abstraction.
//!
//! The serializer writes groups, attributes and typed datasets through the
//! [`Container`] trait and never talks to a storage library directly. Two
//! backends exist:
//!
//! - [`memory::MemoryContainer`]: an in-process tree, used for buffering and tests;
//! - `hdf5::Hdf5Container` (feature `storage_hdf5`): an HDF5 file.
//!
//! Nodes are addressed by absolute [`NodePath`]s such as `/entry/data/x`.
//! Growable datasets are resizable along their leading axis only.

pub mod memory;

#[cfg(feature = "storage_hdf5")]
pub mod hdf5;

use crate::array::{Array, ElementKind};
use crate::config::FileOptions;
use crate::error::ExportResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Absolute path of a node inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(String);

impl NodePath {
    /// The root group.
    pub fn root() -> Self {
        NodePath("/".to_string())
    }

    /// Child of this node.
    pub fn join(&self, name: &str) -> Self {
        if self.0 == "/" {
            NodePath(format!("/{name}"))
        } else {
            NodePath(format!("{}/{name}", self.0))
        }
    }

    /// Path as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path component (empty for the root).
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Path components, root excluded.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Parse an absolute path; relative input is anchored at the root.
    pub fn parse(path: &str) -> Self {
        path.split('/')
            .filter(|c| !c.is_empty())
            .fold(NodePath::root(), |acc, c| acc.join(c))
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a container file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Read/write if it exists, create otherwise.
    #[default]
    Append,
    /// Create, truncating any existing file.
    Create,
    /// Create, failing if the file exists.
    CreateExclusive,
    /// Read/write, the file must exist.
    ReadWrite,
}

/// Storage layout of a dataset's element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementLayout {
    /// Element kind.
    pub kind: ElementKind,
    /// Fixed text width in bytes, for text datasets.
    pub text_width: Option<usize>,
}

/// Writable hierarchical container (one open file).
pub trait Container {
    /// Create a new group. The parent must exist and the name must be free.
    fn create_group(&mut self, path: &NodePath) -> ExportResult<()>;

    /// Whether a node (group or dataset) exists at `path`.
    fn exists(&self, path: &NodePath) -> bool;

    /// Create the group if it does not exist yet.
    fn require_group(&mut self, path: &NodePath) -> ExportResult<()> {
        if self.exists(path) {
            Ok(())
        } else {
            self.create_group(path)
        }
    }

    /// Set (or replace) an attribute on a group or dataset.
    fn set_attr(&mut self, path: &NodePath, name: &str, value: &Array) -> ExportResult<()>;

    /// Create a fixed-shape dataset holding `data`.
    fn write_dataset(&mut self, path: &NodePath, data: &Array) -> ExportResult<()>;

    /// Create a chunked dataset with unlimited leading axis, initialized with `data`.
    fn create_growable(&mut self, path: &NodePath, data: &Array, chunk: &[usize]) -> ExportResult<()>;

    /// Current shape of a dataset.
    fn shape(&self, path: &NodePath) -> ExportResult<Vec<usize>>;

    /// Element layout of a dataset.
    fn layout(&self, path: &NodePath) -> ExportResult<ElementLayout>;

    /// Resize the leading axis of a growable dataset.
    fn resize(&mut self, path: &NodePath, rows: usize) -> ExportResult<()>;

    /// Overwrite rows `[offset, offset + data.rows())` of a dataset.
    fn write_rows(&mut self, path: &NodePath, offset: usize, data: &Array) -> ExportResult<()>;

    /// Push buffered writes to storage.
    fn flush(&mut self) -> ExportResult<()>;

    /// Close the container. Further writes fail; closing twice is a no-op.
    fn close(&mut self) -> ExportResult<()>;
}

/// Opens containers for a file manager.
pub trait Opener {
    /// Open or create the container stored at `path`.
    fn open(&self, path: &Path, mode: OpenMode, options: &FileOptions) -> ExportResult<Box<dyn Container>>;

    /// Whether a container is already stored at `path`.
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Make `path` openable, creating missing parent directories.
    fn prepare(&self, path: &Path) -> ExportResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// Opener used by [`crate::manager::FileManager`] when none is given.
#[cfg(feature = "storage_hdf5")]
pub type DefaultOpener = self::hdf5::Hdf5Opener;

/// Opener used by [`crate::manager::FileManager`] when none is given.
#[cfg(not(feature = "storage_hdf5"))]
pub type DefaultOpener = UnavailableOpener;

/// Placeholder opener for builds without a file backend.
#[cfg(not(feature = "storage_hdf5"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableOpener;

#[cfg(not(feature = "storage_hdf5"))]
impl Opener for UnavailableOpener {
    fn open(&self, _path: &Path, _mode: OpenMode, _options: &FileOptions) -> ExportResult<Box<dyn Container>> {
        Err(crate::error::ExportError::FeatureNotEnabled(
            "storage_hdf5".to_string(),
        ))
    }
}
