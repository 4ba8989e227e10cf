//! In-memory container backend.
//!
//! Mirrors the subset of HDF5 semantics the serializer relies on: groups
//! with attributes, fixed datasets, and chunked datasets that grow along the
//! leading axis. A `MemoryContainer` is a cheap handle; clones share the same
//! tree, so a caller can keep one to inspect what a serializer wrote after
//! the serializer closed its copy.

use super::{Container, ElementLayout, NodePath, OpenMode, Opener};
use crate::array::Array;
use crate::config::FileOptions;
use crate::error::{ExportError, ExportResult};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// A group node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemGroup {
    /// Attributes by name.
    pub attrs: BTreeMap<String, Array>,
    /// Child nodes by name.
    pub children: BTreeMap<String, MemNode>,
}

/// A dataset node.
#[derive(Debug, Clone, PartialEq)]
pub struct MemDataset {
    /// Attributes by name.
    pub attrs: BTreeMap<String, Array>,
    /// Current contents.
    pub data: Array,
    /// Chunk shape, for growable datasets.
    pub chunk: Option<Vec<usize>>,
}

impl MemDataset {
    /// Whether the leading axis can grow.
    pub fn is_growable(&self) -> bool {
        self.chunk.is_some()
    }
}

/// Any node in the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum MemNode {
    /// Group.
    Group(MemGroup),
    /// Dataset.
    Dataset(MemDataset),
}

#[derive(Debug, Default)]
struct Tree {
    root: MemGroup,
    closed: bool,
}

/// Shared handle to an in-memory container.
#[derive(Debug, Clone, Default)]
pub struct MemoryContainer {
    tree: Rc<RefCell<Tree>>,
}

impl MemoryContainer {
    /// Empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`Container::close`] was called on any handle.
    pub fn is_closed(&self) -> bool {
        self.tree.borrow().closed
    }

    /// Reopen a closed container for writing.
    pub fn reopen(&self) {
        self.tree.borrow_mut().closed = false;
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> MemGroup {
        self.tree.borrow().root.clone()
    }

    /// Copy of the node at `path`.
    pub fn node(&self, path: &str) -> Option<MemNode> {
        let tree = self.tree.borrow();
        let path = NodePath::parse(path);
        if path == NodePath::root() {
            return Some(MemNode::Group(tree.root.clone()));
        }
        find(&tree.root, &path).cloned()
    }

    /// Whether a group exists at `path`.
    pub fn is_group(&self, path: &str) -> bool {
        matches!(self.node(path), Some(MemNode::Group(_)))
    }

    /// Contents of the dataset at `path`.
    pub fn dataset(&self, path: &str) -> Option<Array> {
        match self.node(path)? {
            MemNode::Dataset(ds) => Some(ds.data),
            MemNode::Group(_) => None,
        }
    }

    /// Attribute `name` of the node at `path`.
    pub fn attr(&self, path: &str, name: &str) -> Option<Array> {
        match self.node(path)? {
            MemNode::Dataset(ds) => ds.attrs.get(name).cloned(),
            MemNode::Group(g) => g.attrs.get(name).cloned(),
        }
    }

    /// Names of the children of the group at `path`.
    pub fn children(&self, path: &str) -> Vec<String> {
        match self.node(path) {
            Some(MemNode::Group(g)) => g.children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn check_open(&self, path: &NodePath) -> ExportResult<()> {
        if self.is_closed() {
            Err(ExportError::FileClosed(path.to_string()))
        } else {
            Ok(())
        }
    }

    fn with_dataset<T>(
        &self,
        path: &NodePath,
        f: impl FnOnce(&mut MemDataset) -> ExportResult<T>,
    ) -> ExportResult<T> {
        let mut tree = self.tree.borrow_mut();
        match find_mut(&mut tree.root, path) {
            Some(MemNode::Dataset(ds)) => f(ds),
            Some(MemNode::Group(_)) => Err(ExportError::Container(format!("'{path}' is a group, not a dataset"))),
            None => Err(ExportError::Container(format!("no dataset at '{path}'"))),
        }
    }

    fn insert(&self, path: &NodePath, node: MemNode) -> ExportResult<()> {
        self.check_open(path)?;
        let mut tree = self.tree.borrow_mut();
        let parent = parent_group_mut(&mut tree.root, path)?;
        let name = path.name().to_string();
        if parent.children.contains_key(&name) {
            return Err(ExportError::Container(format!("'{path}' already exists")));
        }
        parent.children.insert(name, node);
        Ok(())
    }
}

fn find<'a>(root: &'a MemGroup, path: &NodePath) -> Option<&'a MemNode> {
    let mut parts = path.components().peekable();
    let mut group = root;
    while let Some(part) = parts.next() {
        let node = group.children.get(part)?;
        if parts.peek().is_none() {
            return Some(node);
        }
        match node {
            MemNode::Group(g) => group = g,
            MemNode::Dataset(_) => return None,
        }
    }
    None
}

fn find_mut<'a>(root: &'a mut MemGroup, path: &NodePath) -> Option<&'a mut MemNode> {
    let parts: Vec<&str> = path.components().collect();
    let (last, parents) = parts.split_last()?;
    let mut group = root;
    for part in parents {
        match group.children.get_mut(*part)? {
            MemNode::Group(g) => group = g,
            MemNode::Dataset(_) => return None,
        }
    }
    group.children.get_mut(*last)
}

fn parent_group_mut<'a>(root: &'a mut MemGroup, path: &NodePath) -> ExportResult<&'a mut MemGroup> {
    let parts: Vec<&str> = path.components().collect();
    let Some((_, parents)) = parts.split_last() else {
        return Err(ExportError::Container("the root group cannot be created".to_string()));
    };
    let mut group = root;
    for part in parents {
        match group.children.get_mut(*part) {
            Some(MemNode::Group(g)) => group = g,
            _ => {
                return Err(ExportError::Container(format!(
                    "parent group '{part}' of '{path}' does not exist"
                )))
            }
        }
    }
    Ok(group)
}

impl Container for MemoryContainer {
    fn create_group(&mut self, path: &NodePath) -> ExportResult<()> {
        self.insert(path, MemNode::Group(MemGroup::default()))
    }

    fn exists(&self, path: &NodePath) -> bool {
        *path == NodePath::root() || find(&self.tree.borrow().root, path).is_some()
    }

    fn set_attr(&mut self, path: &NodePath, name: &str, value: &Array) -> ExportResult<()> {
        self.check_open(path)?;
        let mut tree = self.tree.borrow_mut();
        let attrs = if *path == NodePath::root() {
            &mut tree.root.attrs
        } else {
            match find_mut(&mut tree.root, path) {
                Some(MemNode::Group(g)) => &mut g.attrs,
                Some(MemNode::Dataset(ds)) => &mut ds.attrs,
                None => return Err(ExportError::Container(format!("no node at '{path}'"))),
            }
        };
        attrs.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn write_dataset(&mut self, path: &NodePath, data: &Array) -> ExportResult<()> {
        self.insert(
            path,
            MemNode::Dataset(MemDataset {
                attrs: BTreeMap::new(),
                data: data.clone(),
                chunk: None,
            }),
        )
    }

    fn create_growable(&mut self, path: &NodePath, data: &Array, chunk: &[usize]) -> ExportResult<()> {
        if data.shape().is_empty() {
            return Err(ExportError::Container(format!(
                "growable dataset '{path}' needs at least one axis"
            )));
        }
        self.insert(
            path,
            MemNode::Dataset(MemDataset {
                attrs: BTreeMap::new(),
                data: data.clone(),
                chunk: Some(chunk.to_vec()),
            }),
        )
    }

    fn shape(&self, path: &NodePath) -> ExportResult<Vec<usize>> {
        self.with_dataset(path, |ds| Ok(ds.data.shape().to_vec()))
    }

    fn layout(&self, path: &NodePath) -> ExportResult<ElementLayout> {
        self.with_dataset(path, |ds| {
            Ok(ElementLayout {
                kind: ds.data.kind(),
                text_width: ds.data.text_width(),
            })
        })
    }

    fn resize(&mut self, path: &NodePath, rows: usize) -> ExportResult<()> {
        self.check_open(path)?;
        self.with_dataset(path, |ds| {
            if !ds.is_growable() {
                return Err(ExportError::Container(format!("'{path}' is not resizable")));
            }
            ds.data.resize_rows(rows);
            Ok(())
        })
    }

    fn write_rows(&mut self, path: &NodePath, offset: usize, data: &Array) -> ExportResult<()> {
        self.check_open(path)?;
        self.with_dataset(path, |ds| {
            if ds.data.record_shape() != data.record_shape() {
                return Err(ExportError::ShapeMismatch {
                    path: path.to_string(),
                    expected: ds.data.record_shape().to_vec(),
                    actual: data.record_shape().to_vec(),
                });
            }
            if ds.data.write_rows(offset, data) {
                Ok(())
            } else {
                Err(ExportError::Container(format!(
                    "cannot write {} rows at offset {offset} into '{path}' with shape {:?}",
                    data.rows(),
                    ds.data.shape()
                )))
            }
        })
    }

    fn flush(&mut self) -> ExportResult<()> {
        Ok(())
    }

    fn close(&mut self) -> ExportResult<()> {
        self.tree.borrow_mut().closed = true;
        Ok(())
    }
}

/// Opener that hands out in-memory containers, one per path.
///
/// Opening a path again in a non-truncating mode returns a handle to the
/// same tree, like reopening a file on disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    buffers: Rc<RefCell<BTreeMap<PathBuf, MemoryContainer>>>,
}

impl MemoryOpener {
    /// New opener with no buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the container opened at `path`.
    pub fn get(&self, path: &Path) -> Option<MemoryContainer> {
        self.buffers.borrow().get(path).cloned()
    }

    /// Paths opened so far.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.buffers.borrow().keys().cloned().collect()
    }
}

impl Opener for MemoryOpener {
    fn open(&self, path: &Path, mode: OpenMode, _options: &FileOptions) -> ExportResult<Box<dyn Container>> {
        let mut buffers = self.buffers.borrow_mut();
        let existing = buffers.get(path).cloned();
        let container = match (mode, existing) {
            (OpenMode::Append | OpenMode::ReadWrite, Some(c)) => {
                c.reopen();
                c
            }
            (OpenMode::CreateExclusive, Some(_)) => {
                return Err(ExportError::Io(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("{} already exists", path.display()),
                )))
            }
            (OpenMode::ReadWrite, None) => {
                return Err(ExportError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", path.display()),
                )))
            }
            _ => MemoryContainer::new(),
        };
        buffers.insert(path.to_path_buf(), container.clone());
        Ok(Box::new(container))
    }

    fn exists(&self, path: &Path) -> bool {
        self.buffers.borrow().contains_key(path)
    }

    fn prepare(&self, _path: &Path) -> ExportResult<()> {
        Ok(())
    }
}
