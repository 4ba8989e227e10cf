//! Incremental array writer.
//!
//! One operation serves every growable column of a stream, the time axes
//! included. The first batch creates the dataset with an unlimited leading
//! axis and a chunk of one record; later batches grow it and fill the new
//! tail. Rows already written are never touched.
//!
//! Checking and writing are separate steps ([`check_batch`] and
//! [`PendingAppend::commit`]) so a multi-column page is validated as a whole.

use crate::array::Array;
use crate::container::{Container, NodePath};
use crate::error::{ExportError, ExportResult};
use tracing::warn;

/// What [`PendingAppend::commit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// The column did not exist and was created from the batch.
    Created,
    /// The column grew; the batch starts at row `offset`.
    Extended {
        /// Length of the column before the batch.
        offset: usize,
    },
}

/// A batch checked against its column and ready to be written.
///
/// Built by [`check_batch`] without touching the container, so a caller can
/// check every column of a page before the first one is written.
#[derive(Debug, Clone)]
pub struct PendingAppend {
    path: NodePath,
    rows: Array,
    plan: Plan,
}

#[derive(Debug, Clone)]
enum Plan {
    Create { chunk: Vec<usize> },
    Extend { offset: usize },
}

/// Check `batch` against the growable column at `path`.
///
/// A scalar batch counts as one record. The per-record shape of an existing
/// column is fixed: a batch with a different one fails with
/// [`ExportError::ShapeMismatch`]. Numeric batches are converted to the
/// column's element type; text batches are cut to the column's width, and
/// text never mixes with numbers ([`ExportError::TypeMismatch`]).
pub fn check_batch(container: &dyn Container, path: &NodePath, batch: &Array) -> ExportResult<PendingAppend> {
    let batch = if batch.shape().is_empty() {
        Array::new(vec![1], batch.elements().clone())
            .ok_or_else(|| ExportError::Container(format!("invalid scalar batch for '{path}'")))?
    } else {
        batch.clone()
    };

    if !container.exists(path) {
        let chunk = std::iter::once(1)
            .chain(batch.record_shape().iter().map(|&d| d.max(1)))
            .collect();
        return Ok(PendingAppend {
            path: path.clone(),
            rows: batch,
            plan: Plan::Create { chunk },
        });
    }

    let shape = container.shape(path)?;
    let (offset, record_shape) = shape
        .split_first()
        .map(|(rows, rest)| (*rows, rest.to_vec()))
        .unwrap_or((0, Vec::new()));
    if record_shape != batch.record_shape() {
        return Err(ExportError::ShapeMismatch {
            path: path.to_string(),
            expected: record_shape,
            actual: batch.record_shape().to_vec(),
        });
    }

    let layout = container.layout(path)?;
    let (converted, truncated) =
        batch
            .cast_to(layout.kind, layout.text_width)
            .ok_or_else(|| ExportError::TypeMismatch {
                path: path.to_string(),
                expected: layout.kind.to_string(),
                actual: batch.kind().to_string(),
            })?;
    if truncated {
        warn!(
            path = %path,
            width = layout.text_width.unwrap_or_default(),
            "Text longer than the column width was truncated"
        );
    }

    Ok(PendingAppend {
        path: path.clone(),
        rows: converted,
        plan: Plan::Extend { offset },
    })
}

impl PendingAppend {
    /// Column the batch goes to.
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Create or grow the column and write the batch.
    pub fn commit(self, container: &mut dyn Container) -> ExportResult<Appended> {
        match self.plan {
            Plan::Create { chunk } => {
                container.create_growable(&self.path, &self.rows, &chunk)?;
                Ok(Appended::Created)
            }
            Plan::Extend { offset } => {
                container.resize(&self.path, offset + self.rows.rows())?;
                container.write_rows(&self.path, offset, &self.rows)?;
                Ok(Appended::Extended { offset })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::memory::MemoryContainer;
    use crate::value::MetaValue;
    use serde_json::json;
    use tracing_test::traced_test;

    fn batch(v: serde_json::Value) -> Array {
        match MetaValue::from(v) {
            MetaValue::Sequence(items) => Array::from_values(&items).unwrap(),
            other => panic!("not a sequence: {other}"),
        }
    }

    fn append_batch(c: &mut MemoryContainer, path: &NodePath, batch: &Array) -> ExportResult<Appended> {
        check_batch(c, path, batch)?.commit(c)
    }

    fn col() -> NodePath {
        NodePath::parse("/x")
    }

    #[test]
    fn first_batch_creates_chunked_column() {
        let mut c = MemoryContainer::new();
        let outcome = append_batch(&mut c, &col(), &batch(json!([[1.0, 2.0], [3.0, 4.0]]))).unwrap();
        assert_eq!(outcome, Appended::Created);
        let crate::container::memory::MemNode::Dataset(ds) = c.node("/x").unwrap() else {
            panic!("expected dataset");
        };
        assert_eq!(ds.chunk, Some(vec![1, 2]));
        assert_eq!(ds.data.shape(), &[2, 2]);
    }

    #[test]
    fn column_length_is_sum_of_batches_and_rows_stay_in_order() {
        let mut c = MemoryContainer::new();
        let batches = [json!([1.0]), json!([2.0, 3.0, 4.0]), json!([5.0, 6.0])];
        let mut offsets = Vec::new();
        for b in batches {
            if let Appended::Extended { offset } = append_batch(&mut c, &col(), &batch(b)).unwrap() {
                offsets.push(offset);
            }
        }
        assert_eq!(offsets, vec![1, 4]);
        assert_eq!(
            c.dataset("/x").unwrap().as_floats().unwrap(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn record_shape_is_fixed() {
        let mut c = MemoryContainer::new();
        append_batch(&mut c, &col(), &batch(json!([[1, 2]]))).unwrap();
        let err = append_batch(&mut c, &col(), &batch(json!([[1, 2, 3]]))).unwrap_err();
        assert!(matches!(
            err,
            ExportError::ShapeMismatch { ref expected, ref actual, .. }
                if expected == &vec![2] && actual == &vec![3]
        ));
        assert_eq!(c.dataset("/x").unwrap().shape(), &[1, 2]);
    }

    #[test]
    fn checking_does_not_touch_the_column() {
        let mut c = MemoryContainer::new();
        append_batch(&mut c, &col(), &batch(json!([1.0]))).unwrap();
        let pending = check_batch(&c, &col(), &batch(json!([2.0, 3.0]))).unwrap();
        assert_eq!(c.dataset("/x").unwrap().shape(), &[1]);
        assert_eq!(pending.path(), &col());
        assert_eq!(pending.commit(&mut c).unwrap(), Appended::Extended { offset: 1 });
        assert_eq!(c.dataset("/x").unwrap().as_floats().unwrap(), &[1.0, 2.0, 3.0]);

        assert!(check_batch(&c, &col(), &batch(json!([[1.0, 2.0]]))).is_err());
        assert!(check_batch(&c, &NodePath::parse("/y"), &batch(json!([1]))).is_ok());
        assert!(!c.exists(&NodePath::parse("/y")));
    }

    #[test]
    fn numbers_convert_to_column_type() {
        let mut c = MemoryContainer::new();
        append_batch(&mut c, &col(), &batch(json!([1.5]))).unwrap();
        append_batch(&mut c, &col(), &batch(json!([2]))).unwrap();
        assert_eq!(c.dataset("/x").unwrap().as_floats().unwrap(), &[1.5, 2.0]);
    }

    #[test]
    fn text_and_numbers_do_not_mix() {
        let mut c = MemoryContainer::new();
        append_batch(&mut c, &col(), &batch(json!([1.0]))).unwrap();
        let err = append_batch(&mut c, &col(), &batch(json!(["a"]))).unwrap_err();
        assert!(matches!(err, ExportError::TypeMismatch { .. }));
    }

    #[test]
    #[traced_test]
    fn wide_text_is_truncated_to_column_width() {
        let mut c = MemoryContainer::new();
        append_batch(&mut c, &col(), &batch(json!(["abc"]))).unwrap();
        append_batch(&mut c, &col(), &batch(json!(["abcdef"]))).unwrap();
        assert_eq!(c.dataset("/x").unwrap().as_texts().unwrap(), &["abc", "abc"]);
        assert!(logs_contain("truncated"));
    }

    #[test]
    fn scalars_count_as_one_record() {
        let mut c = MemoryContainer::new();
        append_batch(&mut c, &col(), &Array::float(0.5)).unwrap();
        append_batch(&mut c, &col(), &Array::float(1.5)).unwrap();
        assert_eq!(c.dataset("/x").unwrap().as_floats().unwrap(), &[0.5, 1.5]);
    }
}
