//! Plot bindings and fit result tables.
//!
//! A live plot shown during acquisition names the stream and columns it
//! draws. At run stop those bindings become NeXus plotting hints on the
//! stream group (`axes`, `signal`, `auxiliary_signals`), and the curve fits
//! attached to a plot are written as per-iteration tables under
//! `<stream>/fits/<fit name>`.
//!
//! Fit results are produced elsewhere; this module only lays them out.

use crate::array::{Array, Elements};
use crate::container::{Container, NodePath};
use crate::error::{ExportError, ExportResult};
use crate::materialize::value_array;
use crate::time::{iso8601, ISO8601_WIDTH};
use crate::value::Mapping;
use serde::{Deserialize, Serialize};

/// What a plot draws from its stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlotKind {
    /// One or more curves over `x`.
    Line {
        /// Plotted columns.
        ys: Vec<String>,
    },
    /// A map of `z` over the `x`/`y` plane.
    Map {
        /// Second axis column.
        y: String,
        /// Plotted column.
        z: String,
    },
}

/// A plot drawn from one stream, with the fits attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotBinding {
    /// Stream name.
    pub stream: String,
    /// First axis column.
    pub x: String,
    /// Plot kind and its remaining columns.
    #[serde(flatten)]
    pub kind: PlotKind,
    /// Live fits shown in the plot.
    #[serde(default)]
    pub fits: Vec<Fit>,
}

impl PlotBinding {
    /// Line plot of `ys` over `x`.
    pub fn line<S: Into<String>>(stream: &str, x: &str, ys: impl IntoIterator<Item = S>) -> Self {
        Self {
            stream: stream.to_string(),
            x: x.to_string(),
            kind: PlotKind::Line {
                ys: ys.into_iter().map(Into::into).collect(),
            },
            fits: Vec::new(),
        }
    }

    /// Map plot of `z` over `x` and `y`.
    pub fn map(stream: &str, x: &str, y: &str, z: &str) -> Self {
        Self {
            stream: stream.to_string(),
            x: x.to_string(),
            kind: PlotKind::Map {
                y: y.to_string(),
                z: z.to_string(),
            },
            fits: Vec::new(),
        }
    }

    /// Attach a fit.
    pub fn with_fit(mut self, fit: Fit) -> Self {
        self.fits.push(fit);
        self
    }

    /// Axis columns, in plot order.
    pub fn axes(&self) -> Vec<&str> {
        match &self.kind {
            PlotKind::Line { .. } => vec![self.x.as_str()],
            PlotKind::Map { y, .. } => vec![self.x.as_str(), y.as_str()],
        }
    }

    /// Signal columns, in plot order.
    pub fn signals(&self) -> Vec<&str> {
        match &self.kind {
            PlotKind::Line { ys } => ys.iter().map(String::as_str).collect(),
            PlotKind::Map { z, .. } => vec![z.as_str()],
        }
    }
}

/// Plotting hints accumulated for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHints {
    /// Stream name.
    pub stream: String,
    /// Distinct axis columns, first use first.
    pub axes: Vec<String>,
    /// Distinct signal columns, first use first.
    pub signals: Vec<String>,
}

impl StreamHints {
    /// Tag `group` with `axes`, `signal` and `auxiliary_signals`.
    pub fn write(&self, container: &mut dyn Container, group: &NodePath) -> ExportResult<()> {
        container.set_attr(group, "axes", &Array::texts(self.axes.iter().cloned()))?;
        if let Some((signal, auxiliary)) = self.signals.split_first() {
            container.set_attr(group, "signal", &Array::text(signal.clone()))?;
            if !auxiliary.is_empty() {
                container.set_attr(group, "auxiliary_signals", &Array::texts(auxiliary.iter().cloned()))?;
            }
        }
        Ok(())
    }
}

/// Merge the axes and signals of every binding whose stream is known.
///
/// Streams appear in the order their first binding does.
pub fn collect_hints<'a>(
    bindings: impl IntoIterator<Item = &'a PlotBinding>,
    is_known: impl Fn(&str) -> bool,
) -> Vec<StreamHints> {
    let mut hints: Vec<StreamHints> = Vec::new();
    for binding in bindings {
        if !is_known(&binding.stream) {
            continue;
        }
        let index = match hints.iter().position(|h| h.stream == binding.stream) {
            Some(i) => i,
            None => {
                hints.push(StreamHints {
                    stream: binding.stream.clone(),
                    axes: Vec::new(),
                    signals: Vec::new(),
                });
                hints.len() - 1
            }
        };
        let entry = &mut hints[index];
        push_distinct(&mut entry.axes, binding.axes());
        push_distinct(&mut entry.signals, binding.signals());
    }
    hints
}

fn push_distinct(list: &mut Vec<String>, names: Vec<&str>) {
    for name in names {
        if !list.iter().any(|n| n == name) {
            list.push(name.to_string());
        }
    }
}

/// One fit iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitIteration {
    /// When the fit ran, seconds since the Unix epoch.
    pub timestamp: f64,
    /// Parameter names of the fit model.
    #[serde(default)]
    pub param_names: Vec<String>,
    /// Fitted parameter values.
    pub values: Vec<(String, f64)>,
    /// Covariance of the varied parameters, if the fit produced one.
    #[serde(default)]
    pub covariance: Option<Vec<Vec<f64>>>,
}

/// A curve fit with all its iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fit {
    /// Fit name; becomes the group name.
    pub name: String,
    /// Iterations, in any order.
    #[serde(default)]
    pub results: Vec<FitIteration>,
    /// Extra outputs written verbatim.
    #[serde(default)]
    pub additional: Mapping,
}

impl Fit {
    /// Fit without results.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            results: Vec::new(),
            additional: Mapping::new(),
        }
    }

    /// Add an iteration.
    pub fn with_iteration(mut self, iteration: FitIteration) -> Self {
        self.results.push(iteration);
        self
    }

    /// Build the result table, or `None` if the fit never ran.
    pub fn table(&self) -> ExportResult<Option<FitTable>> {
        if self.results.is_empty() {
            return Ok(None);
        }

        let mut iterations: Vec<&FitIteration> = self.results.iter().collect();
        iterations.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let param_names = self.results[0].param_names.clone();

        let mut size = None;
        let mut covariance = Vec::new();
        for it in &iterations {
            let p = it.values.len();
            let matrix = it
                .covariance
                .clone()
                .unwrap_or_else(|| vec![vec![f64::NAN; p]; p]);
            let rows = matrix.len();
            let square = matrix.iter().all(|row| row.len() == rows);
            let expected = *size.get_or_insert(rows);
            if !square || rows != expected {
                return Err(ExportError::ShapeMismatch {
                    path: format!("fits/{}/covariance", self.name),
                    expected: vec![expected, expected],
                    actual: vec![rows, matrix.first().map_or(0, Vec::len)],
                });
            }
            covariance.extend(matrix.into_iter().flatten());
        }
        let p = size.unwrap_or(0);
        let covariance = Array::new(vec![iterations.len(), p, p], Elements::Float(covariance))
            .ok_or_else(|| ExportError::Container(format!("covariance of fit '{}' is not rectangular", self.name)))?;

        let mut parameters: Vec<(String, Vec<f64>)> = Vec::new();
        for it in &iterations {
            for (name, value) in &it.values {
                match parameters.iter_mut().find(|(n, _)| n == name) {
                    Some((_, column)) => column.push(*value),
                    None => parameters.push((name.clone(), vec![*value])),
                }
            }
        }

        Ok(Some(FitTable {
            name: self.name.clone(),
            param_names,
            timestamps: iterations.iter().map(|it| it.timestamp).collect(),
            covariance,
            parameters,
            additional: self.additional.clone(),
        }))
    }
}

/// Timestamp-sorted table of one fit, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct FitTable {
    /// Fit name.
    pub name: String,
    /// Parameter names of the first iteration.
    pub param_names: Vec<String>,
    /// Iteration timestamps, ascending.
    pub timestamps: Vec<f64>,
    /// Stacked covariance, `n × p × p`.
    pub covariance: Array,
    /// Parameter values across iterations, by first appearance.
    pub parameters: Vec<(String, Vec<f64>)>,
    /// Extra outputs.
    pub additional: Mapping,
}

impl FitTable {
    /// Write the table under `<stream_group>/fits/<name>`.
    pub fn write(&self, container: &mut dyn Container, stream_group: &NodePath, start_time: f64) -> ExportResult<()> {
        let fits = stream_group.join("fits");
        container.require_group(&fits)?;
        let group = fits.join(&self.name);
        container.require_group(&group)?;

        container.set_attr(&group, "param_names", &Array::texts(self.param_names.iter().cloned()))?;
        container.write_dataset(
            &group.join("time"),
            &Array::texts_with_width(self.timestamps.iter().map(|t| iso8601(*t)), ISO8601_WIDTH),
        )?;
        container.write_dataset(
            &group.join("time_since_start"),
            &Array::floats(self.timestamps.iter().map(|t| t - start_time).collect()),
        )?;

        let covariance = group.join("covariance");
        container.write_dataset(&covariance, &self.covariance)?;
        let p = self.covariance.shape().get(1).copied().unwrap_or(0);
        let sliced = self.param_names.iter().take(p).cloned();
        container.set_attr(&covariance, "parameters", &Array::texts(sliced))?;

        for (name, values) in &self.parameters {
            container.write_dataset(&group.join(name), &Array::floats(values.clone()))?;
        }
        for (name, value) in &self.additional {
            if let Some(array) = value_array(value) {
                container.write_dataset(&group.join(name), &array)?;
            }
        }
        Ok(())
    }
}
