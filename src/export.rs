//! One-call export of a document stream.
//!
//! # Example
//! ```no_run
//! use daq_nexus::document::Document;
//! use daq_nexus::export::{export, ExportOptions};
//!
//! # fn run(documents: Vec<Document>) -> Result<(), daq_nexus::error::ExportError> {
//! let artifacts = export(documents, "/data/runs", ExportOptions::default())?;
//! for (entry, paths) in &artifacts {
//!     println!("{entry}: {paths:?}");
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::{ExportConfig, FileOptions};
use crate::document::Document;
use crate::environment::{BuildEnvironment, EnvironmentProvider};
use crate::error::{ExportError, ExportResult};
use crate::manager::{Artifacts, FileManager, Manager};
use crate::plot::PlotBinding;
use crate::serializer::{Serializer, SerializerOptions};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where an export writes to.
pub enum OutputLocation {
    /// Container files under this directory.
    Directory(PathBuf),
    /// A caller-provided manager.
    Manager(Box<dyn Manager>),
}

impl From<PathBuf> for OutputLocation {
    fn from(path: PathBuf) -> Self {
        OutputLocation::Directory(path)
    }
}

impl From<&Path> for OutputLocation {
    fn from(path: &Path) -> Self {
        OutputLocation::Directory(path.to_path_buf())
    }
}

impl From<&str> for OutputLocation {
    fn from(path: &str) -> Self {
        OutputLocation::Directory(PathBuf::from(path))
    }
}

impl From<Box<dyn Manager>> for OutputLocation {
    fn from(manager: Box<dyn Manager>) -> Self {
        OutputLocation::Manager(manager)
    }
}

/// Options of [`export`].
pub struct ExportOptions {
    /// Naming and layout.
    pub serializer: SerializerOptions,
    /// Never append to an existing file (directory output only).
    pub one_file_per_entry: bool,
    /// File layer options (directory output only).
    pub file: FileOptions,
    /// Source of `process/python_environment`.
    pub environment: Box<dyn EnvironmentProvider>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from_config(&ExportConfig::default())
    }
}

impl ExportOptions {
    /// Options from the loaded configuration.
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            serializer: SerializerOptions::from_config(config),
            one_file_per_entry: config.output.one_file_per_entry,
            file: config.file.clone(),
            environment: Box::new(BuildEnvironment),
        }
    }

    /// Use another name template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.serializer.name_template = template.into();
        self
    }

    /// Bind live plots.
    pub fn with_plots(mut self, plots: Vec<PlotBinding>) -> Self {
        self.serializer.plots = plots;
        self
    }

    /// Set one-file-per-entry mode.
    pub fn one_file_per_entry(mut self, enabled: bool) -> Self {
        self.one_file_per_entry = enabled;
        self
    }

    /// Use another environment provider.
    pub fn with_environment(mut self, environment: Box<dyn EnvironmentProvider>) -> Self {
        self.environment = environment;
        self
    }
}

fn serializer_for(output: OutputLocation, options: ExportOptions) -> ExportResult<Serializer> {
    let manager: Box<dyn Manager> = match output {
        OutputLocation::Directory(directory) => {
            options.file.validate()?;
            Box::new(
                FileManager::new(directory)
                    .one_file_per_entry(options.one_file_per_entry)
                    .with_options(options.file),
            )
        }
        OutputLocation::Manager(manager) => manager,
    };
    Ok(Serializer::new(manager, options.serializer).with_environment(options.environment))
}

/// Write `documents` and return the produced artifacts.
///
/// Containers are closed before returning, on success and on error.
pub fn export(
    documents: impl IntoIterator<Item = Document>,
    output: impl Into<OutputLocation>,
    options: ExportOptions,
) -> ExportResult<Artifacts> {
    let mut serializer = serializer_for(output.into(), options)?;
    for document in documents {
        serializer.handle(document)?;
    }
    serializer.close()?;
    Ok(serializer.artifacts())
}

/// Like [`export`], reading one `[kind, payload]` JSON array per line.
///
/// Blank lines are skipped. A line that does not decode aborts the export
/// with its line number.
pub fn export_json_lines(
    reader: impl BufRead,
    output: impl Into<OutputLocation>,
    options: ExportOptions,
) -> ExportResult<Artifacts> {
    let mut serializer = serializer_for(output.into(), options)?;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let document = Document::from_json_line(&line).map_err(|e| match e {
            ExportError::Json(inner) => ExportError::malformed("json", format!("line {}: {inner}", index + 1)),
            other => other,
        })?;
        debug!(line = index + 1, kind = document.kind(), "Read document");
        serializer.handle(document)?;
    }
    serializer.close()?;
    Ok(serializer.artifacts())
}
