//! Document router.
//!
//! [`Serializer`] consumes one run's documents in order and writes them into
//! a NeXus entry through its [`Manager`]:
//!
//! ```text
//! start       → entry with process, user, sample, instrument and data groups
//! descriptor  → stream group (primary writes into data itself)
//! event_page  → one sample on the time axes, all rows on the columns
//! stop        → end_time, fit tables, plotting hints, close
//! ```
//!
//! Batches for unknown streams are dropped; every other failure is returned
//! and leaves what was already written in place. The containers are closed
//! on [`Serializer::close`], on stop, and when the serializer is dropped.

use crate::array::Array;
use crate::array_writer::{check_batch, Appended};
use crate::config::{ExportConfig, NexusConfig};
use crate::container::{Container, NodePath, OpenMode};
use crate::document::{Descriptor, Document, EventPage, RunStart, RunStop};
use crate::environment::{BuildEnvironment, EnvironmentProvider};
use crate::error::{ExportError, ExportResult};
use crate::manager::{Artifacts, Manager};
use crate::materialize::{materialize, materialize_mapping, value_array};
use crate::plot::{collect_hints, PlotBinding};
use crate::registry::{Claim, StreamRegistry};
use crate::template;
use crate::time::{iso8601, ISO8601_WIDTH};
use crate::value::{Mapping, MetaValue};
use std::path::PathBuf;
use tracing::{debug, error, info};

/// How runs are named and laid out.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializerOptions {
    /// File name template filled from the start document.
    pub name_template: String,
    /// Extension appended to rendered names that lack it.
    pub extension: String,
    /// Mode containers are opened with.
    pub open_mode: OpenMode,
    /// Entry layout conventions.
    pub nexus: NexusConfig,
    /// Live plots of the run, evaluated at stop.
    pub plots: Vec<PlotBinding>,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self::from_config(&ExportConfig::default())
    }
}

impl SerializerOptions {
    /// Options from the loaded configuration.
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            name_template: config.output.name_template.clone(),
            extension: config.output.extension.trim_start_matches('.').to_string(),
            open_mode: config.output.open_mode,
            nexus: config.nexus.clone(),
            plots: Vec::new(),
        }
    }

    /// Use another name template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.name_template = template.into();
        self
    }

    /// Bind live plots.
    pub fn with_plots(mut self, plots: Vec<PlotBinding>) -> Self {
        self.plots = plots;
        self
    }
}

/// State of the run being written.
#[derive(Debug)]
struct RunState {
    file: PathBuf,
    entry: NodePath,
    data: NodePath,
    start_time: f64,
    streams: StreamRegistry,
}

/// Writes the documents of a run into a container.
pub struct Serializer<M: Manager = Box<dyn Manager>> {
    manager: M,
    options: SerializerOptions,
    environment: Box<dyn EnvironmentProvider>,
    run: Option<RunState>,
}

impl<M: Manager> Serializer<M> {
    /// Serializer writing through `manager`.
    pub fn new(manager: M, options: SerializerOptions) -> Self {
        Self {
            manager,
            options,
            environment: Box::new(BuildEnvironment),
            run: None,
        }
    }

    /// Use another source for `process/python_environment`.
    pub fn with_environment(mut self, environment: Box<dyn EnvironmentProvider>) -> Self {
        self.environment = environment;
        self
    }

    /// Route one document.
    pub fn handle(&mut self, document: Document) -> ExportResult<()> {
        match document {
            Document::Start(doc) => self.start(doc),
            Document::Descriptor(doc) => self.descriptor(&doc),
            Document::EventPage(doc) => self.event_page(&doc),
            Document::Event(doc) => self.event_page(&EventPage::from(doc)),
            Document::Stop(doc) => self.stop(&doc),
            Document::Other(kind) => {
                debug!(kind = %kind, "Ignoring document");
                Ok(())
            }
        }
    }

    /// Open the run's file and write the entry skeleton.
    pub fn start(&mut self, doc: RunStart) -> ExportResult<()> {
        let mut fields = doc.to_mapping();
        let rendered = template::render(&self.options.name_template, &fields)?;
        let suffix = format!(".{}", self.options.extension);
        let relative = if rendered.ends_with(&suffix) {
            PathBuf::from(rendered)
        } else {
            PathBuf::from(format!("{rendered}{suffix}"))
        };

        let start_iso = iso8601(doc.time);
        let label = match doc.session_name() {
            Some(session) => format!("{session}_{start_iso}"),
            None => start_iso.clone(),
        };

        let file = self.manager.open(&relative, &label, self.options.open_mode)?;
        let container = self.manager.container_mut(&file)?;
        let nexus = &self.options.nexus;

        let entry = NodePath::root().join(&label);
        container.create_group(&entry)?;
        container.set_attr(&entry, "NX_class", &Array::text("NXentry"))?;
        container.write_dataset(&entry.join("definition"), &Array::text(nexus.definition.clone()))?;
        container.write_dataset(&entry.join("start_time"), &Array::text(start_iso))?;
        for (key, target) in [
            ("description", "experiment_description"),
            ("identifier", "experiment_identifier"),
        ] {
            if let Some(array) = fields.remove(key).as_ref().and_then(value_array) {
                container.write_dataset(&entry.join(target), &array)?;
            }
        }

        write_process(container, &entry, nexus, fields.remove("versions"), self.environment.as_ref())?;
        for (key, class) in [("user", "NXuser"), ("sample", "NXsample")] {
            let group = classed_group(container, &entry, key, class)?;
            if let Some(value) = fields.remove(key) {
                materialize(container, &group, &value)?;
            }
        }
        write_instrument(container, &entry, fields.remove("devices"))?;

        materialize_mapping(container, &entry, &fields)?;
        let data = classed_group(container, &entry, "data", "NXdata")?;

        info!(uid = %doc.uid, entry = %entry, path = %file.display(), "Run started");
        self.run = Some(RunState {
            file,
            entry,
            data,
            start_time: doc.time,
            streams: StreamRegistry::new(),
        });
        Ok(())
    }

    /// Register a stream and create its group.
    pub fn descriptor(&mut self, doc: &Descriptor) -> ExportResult<()> {
        let run = self
            .run
            .as_mut()
            .ok_or_else(|| ExportError::NoActiveRun("descriptor".to_string()))?;
        let nexus = &self.options.nexus;

        if doc.name.contains(&nexus.readying_marker) {
            debug!(stream = %doc.name, "Ignoring readying stream");
            return Ok(());
        }
        if run.streams.claim(&doc.name, &doc.uid)? == Claim::Registered {
            debug!(stream = %doc.name, uid = %doc.uid, "Stream already registered");
            return Ok(());
        }

        let group = if doc.name == nexus.primary_stream {
            run.data.clone()
        } else {
            let container = self.manager.container_mut(&run.file)?;
            classed_group(container, &run.data, &doc.name, "NXdata")?
        };
        debug!(stream = %doc.name, uid = %doc.uid, group = %group, "Registered stream");
        run.streams.register(&doc.uid, &doc.name, group, doc.data_keys.clone())
    }

    /// Append a batch to its stream.
    pub fn event_page(&mut self, doc: &EventPage) -> ExportResult<()> {
        let Some((run, group)) = self
            .run
            .as_ref()
            .and_then(|run| run.streams.group(&doc.descriptor).map(|g| (run, g.clone())))
        else {
            debug!(descriptor = %doc.descriptor, "Dropping event page for unknown stream");
            return Ok(());
        };

        let first = *doc
            .time
            .first()
            .ok_or_else(|| ExportError::malformed("event_page", "no timestamps"))?;
        let mut columns = Vec::with_capacity(doc.data.len());
        for (name, values) in &doc.data {
            let array = Array::from_values(values).ok_or_else(|| {
                ExportError::malformed("event_page", format!("column '{name}' has no fixed-shape layout"))
            })?;
            columns.push((name, array));
        }

        // Every column is checked before the first write, so a rejected page
        // leaves the time axes and all columns at their previous length.
        let container = self.manager.container_mut(&run.file)?;
        let time = check_batch(
            container,
            &group.join("time"),
            &Array::texts_with_width([iso8601(first)], ISO8601_WIDTH),
        )?;
        let since_start = check_batch(
            container,
            &group.join("time_since_start"),
            &Array::floats(vec![first - run.start_time]),
        )?;
        let mut pending = Vec::with_capacity(columns.len());
        for (name, array) in &columns {
            pending.push((*name, check_batch(container, &group.join(name), array)?));
        }

        time.commit(container)?;
        since_start.commit(container)?;
        for (name, append) in pending {
            let path = append.path().clone();
            if append.commit(container)? == Appended::Created {
                for (key, value) in run.streams.schema(&doc.descriptor, name).into_iter().flatten() {
                    if let Some(attr) = value_array(value) {
                        container.set_attr(&path, key, &attr)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Finish the run and close its file.
    pub fn stop(&mut self, doc: &RunStop) -> ExportResult<()> {
        let run = self
            .run
            .as_ref()
            .ok_or_else(|| ExportError::NoActiveRun("stop".to_string()))?;
        let container = self.manager.container_mut(&run.file)?;
        container.write_dataset(&run.entry.join("end_time"), &Array::text(iso8601(doc.time)))?;

        let plots = &self.options.plots;
        for binding in plots {
            let Some(group) = run.streams.group_for_name(&binding.stream) else {
                continue;
            };
            for fit in &binding.fits {
                if let Some(table) = fit.table()? {
                    table.write(container, group, run.start_time)?;
                }
            }
        }
        for hints in collect_hints(plots, |name| run.streams.contains_name(name)) {
            if let Some(group) = run.streams.group_for_name(&hints.stream) {
                hints.write(container, group)?;
            }
        }

        info!(
            entry = %run.entry,
            exit_status = doc.exit_status.as_deref().unwrap_or("unknown"),
            streams = run.streams.len(),
            "Run stopped"
        );
        self.close()
    }

    /// Close every container. Safe to call more than once.
    pub fn close(&mut self) -> ExportResult<()> {
        self.manager.close()
    }

    /// Paths produced so far, by entry label.
    pub fn artifacts(&self) -> Artifacts {
        self.manager.artifacts()
    }

    /// The manager.
    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Entry group of the current run.
    pub fn entry(&self) -> Option<&NodePath> {
        self.run.as_ref().map(|run| &run.entry)
    }
}

impl<M: Manager> Drop for Serializer<M> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.close() {
            error!(error = %e, "Failed to close containers");
        }
    }
}

fn classed_group(container: &mut dyn Container, parent: &NodePath, name: &str, class: &str) -> ExportResult<NodePath> {
    let group = parent.join(name);
    container.create_group(&group)?;
    container.set_attr(&group, "NX_class", &Array::text(class))?;
    Ok(group)
}

fn write_process(
    container: &mut dyn Container,
    entry: &NodePath,
    nexus: &NexusConfig,
    versions: Option<MetaValue>,
    environment: &dyn EnvironmentProvider,
) -> ExportResult<()> {
    let process = classed_group(container, entry, "process", "NXprocess")?;

    let program = process.join("program");
    container.write_dataset(&program, &Array::text(nexus.program_name.clone()))?;
    container.set_attr(&program, "version", &Array::text(nexus.program_version.clone()))?;
    container.set_attr(&program, "program_url", &Array::text(nexus.program_url.clone()))?;

    let versions_group = process.join("versions");
    container.create_group(&versions_group)?;
    if let Some(versions) = versions {
        materialize(container, &versions_group, &versions)?;
    }

    let snapshot = environment.snapshot();
    let env_group = process.join("python_environment");
    container.create_group(&env_group)?;
    if let Some(runtime) = snapshot.runtime_version {
        container.set_attr(&env_group, "runtime_version", &Array::text(runtime))?;
    }
    for (package, version) in snapshot.packages {
        container.write_dataset(&env_group.join(&package), &Array::text(version))?;
    }
    Ok(())
}

fn write_instrument(container: &mut dyn Container, entry: &NodePath, devices: Option<MetaValue>) -> ExportResult<()> {
    let instrument = classed_group(container, entry, "instrument", "NXinstrument")?;
    let devices = match devices {
        None | Some(MetaValue::Null) => return Ok(()),
        Some(value) => value
            .into_mapping()
            .ok_or_else(|| ExportError::malformed("start", "'devices' must be a mapping"))?,
    };

    for (name, settings) in devices {
        let mut settings: Mapping = settings
            .into_mapping()
            .ok_or_else(|| ExportError::malformed("start", format!("device '{name}' must be a mapping")))?;
        let class = settings
            .remove("device_class_name")
            .ok_or_else(|| ExportError::malformed("start", format!("device '{name}' has no 'device_class_name'")))?;
        let model = settings.remove("idn").unwrap_or_else(|| class.clone());

        let group = classed_group(container, &instrument, &name, "NXsensor")?;
        for (field, value) in [("model", &model), ("name", &class)] {
            if let Some(array) = value_array(value) {
                container.write_dataset(&group.join(field), &array)?;
            }
        }
        container.write_dataset(&group.join("short_name"), &Array::text(name.clone()))?;

        let settings_group = group.join("settings");
        container.create_group(&settings_group)?;
        materialize_mapping(container, &settings_group, &settings)?;
    }
    Ok(())
}
