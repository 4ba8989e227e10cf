//! HDF5 container backend.
//!
//! Text is stored as variable-length UTF-8 because the element width of
//! HDF5 fixed strings is a compile-time parameter in the `hdf5` crate. The
//! fixed-width contract is still enforced before data reaches this layer:
//! every element is truncated to the column width when it is appended.
//!
//! Growable datasets use `SimpleExtents` with an unlimited leading extent and
//! the caller's chunk shape; appends are hyperslab writes past the old end.

use super::{Container, ElementLayout, NodePath, OpenMode, Opener};
use crate::array::{Array, ElementKind, Elements};
use crate::config::FileOptions;
use crate::error::{ExportError, ExportResult};
use hdf5::types::{TypeDescriptor, VarLenUnicode};
use hdf5::{Extent, File, Hyperslab, Location, Selection, SimpleExtents, SliceOrIndex};
use ndarray::{ArrayView, IxDyn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Opener for HDF5 files.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hdf5Opener;

impl Opener for Hdf5Opener {
    fn open(&self, path: &Path, mode: OpenMode, options: &FileOptions) -> ExportResult<Box<dyn Container>> {
        let mut builder = File::with_options();
        if options.libver_latest {
            builder.with_fapl(|p| p.libver_latest());
        }
        if let Some(size) = options.userblock_size {
            builder.with_fcpl(|p| p.userblock(size));
        }
        let file = match mode {
            OpenMode::Append => builder.append(path)?,
            OpenMode::Create => builder.create(path)?,
            OpenMode::CreateExclusive => builder.create_excl(path)?,
            OpenMode::ReadWrite => builder.open_rw(path)?,
        };
        tracing::debug!(path = %path.display(), ?mode, "Opened HDF5 file");
        Ok(Box::new(Hdf5Container {
            path: path.to_path_buf(),
            file: Some(file),
            compression: options.compression,
            text_widths: HashMap::new(),
        }))
    }
}

/// One open HDF5 file.
pub struct Hdf5Container {
    path: PathBuf,
    file: Option<File>,
    compression: Option<u8>,
    /// Fixed widths of text datasets created through this handle.
    text_widths: HashMap<NodePath, usize>,
}

impl Hdf5Container {
    fn file(&self) -> ExportResult<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| ExportError::FileClosed(self.path.display().to_string()))
    }

    fn location(&self, path: &NodePath) -> ExportResult<Location> {
        let file = self.file()?;
        if *path == NodePath::root() {
            let location: &Location = file;
            return Ok(location.clone());
        }
        match file.group(path.as_str()) {
            Ok(group) => {
                let location: &Location = &group;
                Ok(location.clone())
            }
            Err(_) => {
                let dataset = file.dataset(path.as_str())?;
                let location: &Location = &dataset;
                Ok(location.clone())
            }
        }
    }
}

fn text_buffer(values: &[String]) -> ExportResult<Vec<VarLenUnicode>> {
    values
        .iter()
        .map(|s| {
            s.parse::<VarLenUnicode>()
                .map_err(|e| ExportError::Container(format!("cannot encode '{s}' as HDF5 text: {e}")))
        })
        .collect()
}

fn extents(shape: &[usize], growable: bool) -> SimpleExtents {
    SimpleExtents::new(shape.iter().enumerate().map(|(axis, &dim)| {
        if growable && axis == 0 {
            Extent::resizable(dim)
        } else {
            Extent::fixed(dim)
        }
    }))
}

fn rows_selection(shape: &[usize], offset: usize, rows: usize) -> Selection {
    let slices: Vec<SliceOrIndex> = shape
        .iter()
        .enumerate()
        .map(|(axis, _)| {
            if axis == 0 {
                SliceOrIndex::from(offset..offset + rows)
            } else {
                SliceOrIndex::from(..)
            }
        })
        .collect();
    Selection::from(Hyperslab::from(slices))
}

macro_rules! with_buffer {
    ($array:expr, |$buf:ident : $t:ident| $body:expr) => {
        match $array.elements() {
            Elements::Bool(v) => {
                let $buf: &[bool] = v;
                type $t = bool;
                $body
            }
            Elements::Int(v) => {
                let $buf: &[i64] = v;
                type $t = i64;
                $body
            }
            Elements::Float(v) => {
                let $buf: &[f64] = v;
                type $t = f64;
                $body
            }
            Elements::Text { values, .. } => {
                let owned = text_buffer(values)?;
                let $buf: &[VarLenUnicode] = &owned;
                type $t = VarLenUnicode;
                $body
            }
        }
    };
}

impl Container for Hdf5Container {
    fn create_group(&mut self, path: &NodePath) -> ExportResult<()> {
        self.file()?.create_group(path.as_str())?;
        Ok(())
    }

    fn exists(&self, path: &NodePath) -> bool {
        match self.file() {
            Ok(file) => *path == NodePath::root() || file.link_exists(path.as_str()),
            Err(_) => false,
        }
    }

    fn set_attr(&mut self, path: &NodePath, name: &str, value: &Array) -> ExportResult<()> {
        let location = self.location(path)?;
        if location.attr(name).is_ok() {
            location.delete_attr(name)?;
        }
        with_buffer!(value, |buf: T| {
            if value.shape().is_empty() {
                location.new_attr::<T>().create(name)?.write_scalar(&buf[0])?;
            } else {
                location
                    .new_attr::<T>()
                    .shape(value.shape().to_vec())
                    .create(name)?
                    .write_raw(buf)?;
            }
        });
        Ok(())
    }

    fn write_dataset(&mut self, path: &NodePath, data: &Array) -> ExportResult<()> {
        let file = self.file()?;
        with_buffer!(data, |buf: T| {
            if data.shape().is_empty() {
                file.new_dataset::<T>().create(path.as_str())?.write_scalar(&buf[0])?;
            } else {
                file.new_dataset::<T>()
                    .shape(extents(data.shape(), false))
                    .create(path.as_str())?
                    .write_raw(buf)?;
            }
        });
        Ok(())
    }

    fn create_growable(&mut self, path: &NodePath, data: &Array, chunk: &[usize]) -> ExportResult<()> {
        let file = self.file()?;
        let compression = self.compression;
        with_buffer!(data, |buf: T| {
            let builder = file.new_dataset::<T>().chunk(chunk.to_vec());
            let builder = match compression {
                Some(level) => builder.deflate(level),
                None => builder,
            };
            builder
                .shape(extents(data.shape(), true))
                .create(path.as_str())?
                .write_raw(buf)?;
        });
        if let Some(width) = data.text_width() {
            self.text_widths.insert(path.clone(), width);
        }
        Ok(())
    }

    fn shape(&self, path: &NodePath) -> ExportResult<Vec<usize>> {
        Ok(self.file()?.dataset(path.as_str())?.shape())
    }

    fn layout(&self, path: &NodePath) -> ExportResult<ElementLayout> {
        let ds = self.file()?.dataset(path.as_str())?;
        let kind = match ds.dtype()?.to_descriptor()? {
            TypeDescriptor::Boolean => ElementKind::Bool,
            TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => ElementKind::Int,
            TypeDescriptor::Float(_) => ElementKind::Float,
            _ => ElementKind::Text,
        };
        Ok(ElementLayout {
            kind,
            text_width: self.text_widths.get(path).copied(),
        })
    }

    fn resize(&mut self, path: &NodePath, rows: usize) -> ExportResult<()> {
        let ds = self.file()?.dataset(path.as_str())?;
        let mut shape = ds.shape();
        if let Some(first) = shape.first_mut() {
            *first = rows;
        }
        ds.resize(shape)?;
        Ok(())
    }

    fn write_rows(&mut self, path: &NodePath, offset: usize, data: &Array) -> ExportResult<()> {
        let ds = self.file()?.dataset(path.as_str())?;
        let shape = ds.shape();
        if shape.get(1..).unwrap_or(&[]) != data.record_shape() {
            return Err(ExportError::ShapeMismatch {
                path: path.to_string(),
                expected: shape.get(1..).unwrap_or(&[]).to_vec(),
                actual: data.record_shape().to_vec(),
            });
        }
        let selection = rows_selection(&shape, offset, data.rows());
        with_buffer!(data, |buf: T| {
            let view = ArrayView::<T, IxDyn>::from_shape(IxDyn(data.shape()), buf)
                .map_err(|e| ExportError::Container(e.to_string()))?;
            ds.write_slice(view, selection)?;
        });
        Ok(())
    }

    fn flush(&mut self) -> ExportResult<()> {
        self.file()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> ExportResult<()> {
        if let Some(file) = self.file.take() {
            file.close()?;
        }
        Ok(())
    }
}
