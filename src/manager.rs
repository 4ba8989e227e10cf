//! File and artifact management.
//!
//! A [`Manager`] turns the relative path derived from a run's name template
//! into an opened container. It owns the open handles and records every
//! produced path under the entry label that requested it.
//!
//! ## Collision policy
//!
//! A path collides when it was already handed out by this manager, or when a
//! file exists there while one-file-per-entry mode is active. A colliding
//! path gets the sanitized entry label appended to its stem:
//!
//! ```text
//! abc-.nxs  →  abc-_s1_2024-05-01T14-03-07+02-00.nxs
//! ```

use crate::config::FileOptions;
use crate::container::memory::{MemoryContainer, MemoryOpener};
use crate::container::{Container, DefaultOpener, OpenMode, Opener};
use crate::error::{ExportError, ExportResult};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Entry label → produced paths, in production order.
pub type Artifacts = BTreeMap<String, Vec<PathBuf>>;

/// Allocates paths, opens containers and tracks produced artifacts.
pub trait Manager {
    /// Allocate the absolute path for `relative`, avoiding collisions.
    ///
    /// Absolute input is rejected with [`ExportError::AbsolutePath`].
    fn reserve(&mut self, label: &str, relative: &Path) -> ExportResult<PathBuf>;

    /// Reserve a path, open the container there and keep the handle.
    ///
    /// Returns the reserved path, which keys the handle afterwards.
    fn open(&mut self, relative: &Path, label: &str, mode: OpenMode) -> ExportResult<PathBuf>;

    /// Handle of the container opened at `path`.
    fn container_mut(&mut self, path: &Path) -> ExportResult<&mut (dyn Container + 'static)>;

    /// Close every open container. Closing twice is a no-op.
    fn close(&mut self) -> ExportResult<()>;

    /// Paths produced so far.
    fn artifacts(&self) -> Artifacts;
}

impl<M: Manager + ?Sized> Manager for Box<M> {
    fn reserve(&mut self, label: &str, relative: &Path) -> ExportResult<PathBuf> {
        (**self).reserve(label, relative)
    }

    fn open(&mut self, relative: &Path, label: &str, mode: OpenMode) -> ExportResult<PathBuf> {
        (**self).open(relative, label, mode)
    }

    fn container_mut(&mut self, path: &Path) -> ExportResult<&mut (dyn Container + 'static)> {
        (**self).container_mut(path)
    }

    fn close(&mut self) -> ExportResult<()> {
        (**self).close()
    }

    fn artifacts(&self) -> Artifacts {
        (**self).artifacts()
    }
}

/// Manager that creates one container file per path under a directory.
pub struct FileManager<O: Opener = DefaultOpener> {
    directory: PathBuf,
    one_file_per_entry: bool,
    options: FileOptions,
    opener: O,
    reserved: HashSet<PathBuf>,
    artifacts: Artifacts,
    files: BTreeMap<PathBuf, Box<dyn Container>>,
}

/// Manager keeping its containers in memory.
pub type MemoryManager = FileManager<MemoryOpener>;

impl FileManager {
    /// Manager writing files under `directory` with the default backend.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_opener(directory, DefaultOpener::default())
    }
}

impl MemoryManager {
    /// Manager keeping containers in memory, keyed by paths under `directory`.
    pub fn in_memory(directory: impl Into<PathBuf>) -> Self {
        Self::with_opener(directory, MemoryOpener::new())
    }

    /// Handle to the buffer produced at `path`.
    pub fn buffer(&self, path: &Path) -> Option<MemoryContainer> {
        self.opener.get(path)
    }
}

impl<O: Opener> FileManager<O> {
    /// Manager opening containers through `opener`.
    pub fn with_opener(directory: impl Into<PathBuf>, opener: O) -> Self {
        Self {
            directory: directory.into(),
            one_file_per_entry: true,
            options: FileOptions::default(),
            opener,
            reserved: HashSet::new(),
            artifacts: Artifacts::new(),
            files: BTreeMap::new(),
        }
    }

    /// Whether an existing file forces a new name (default `true`).
    pub fn one_file_per_entry(mut self, enabled: bool) -> Self {
        self.one_file_per_entry = enabled;
        self
    }

    /// Options passed to the opener.
    pub fn with_options(mut self, options: FileOptions) -> Self {
        self.options = options;
        self
    }

    /// Output directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The backend opener.
    pub fn opener(&self) -> &O {
        &self.opener
    }
}

impl<O: Opener> Manager for FileManager<O> {
    fn reserve(&mut self, label: &str, relative: &Path) -> ExportResult<PathBuf> {
        if relative.is_absolute() {
            return Err(ExportError::AbsolutePath(relative.to_path_buf()));
        }
        let joined = expand_home(&self.directory.join(relative));
        let mut path = std::path::absolute(&joined)?;

        if self.reserved.contains(&path) || (self.one_file_per_entry && self.opener.exists(&path)) {
            let renamed = with_label_suffix(&path, label);
            debug!(from = %path.display(), to = %renamed.display(), "Path taken, renaming");
            path = renamed;
        }

        self.reserved.insert(path.clone());
        self.artifacts
            .entry(label.to_string())
            .or_default()
            .push(path.clone());
        Ok(path)
    }

    fn open(&mut self, relative: &Path, label: &str, mode: OpenMode) -> ExportResult<PathBuf> {
        let path = self.reserve(label, relative)?;
        self.opener.prepare(&path)?;
        let container = self.opener.open(&path, mode, &self.options)?;
        info!(path = %path.display(), ?mode, "Opened container");
        self.files.insert(path.clone(), container);
        Ok(path)
    }

    fn container_mut(&mut self, path: &Path) -> ExportResult<&mut (dyn Container + 'static)> {
        match self.files.get_mut(path) {
            Some(container) => Ok(container.as_mut()),
            None => Err(ExportError::FileClosed(path.display().to_string())),
        }
    }

    fn close(&mut self) -> ExportResult<()> {
        let mut first_error = None;
        for (path, mut container) in std::mem::take(&mut self.files) {
            let closed = container.flush().and_then(|()| container.close());
            match closed {
                Ok(()) => debug!(path = %path.display(), "Closed container"),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn artifacts(&self) -> Artifacts {
        self.artifacts.clone()
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.components().next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(path.strip_prefix("~").unwrap_or(path)),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// `dir/stem.ext` → `dir/stem_<label>.ext`.
fn with_label_suffix(path: &Path, label: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = format!("{stem}_{}", sanitize_label(label));
    if let Some(ext) = path.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    path.with_file_name(name)
}

/// Replace characters that are not safe in file names.
pub fn sanitize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            ' ' | '.' | '?' | '*' => out.push('_'),
            ':' | '/' | '\\' | '|' => out.push('-'),
            '<' => out.push_str("_smaller_"),
            '>' => out.push_str("_greater_"),
            '"' => out.push_str("_quote_"),
            other => out.push(other),
        }
    }
    out
}
