//! Typed n-dimensional arrays as stored in the container.
//!
//! An [`Array`] is a flat, row-major element buffer plus a shape. It is the
//! only payload type the container backends accept for datasets and
//! attributes. A scalar has an empty shape.
//!
//! Text is always stored fixed-width: every element of a text array has at
//! most `width` bytes. Narrower strings are kept as-is and wider strings are
//! truncated on a character boundary when written into an existing column.

use crate::value::{MetaValue, Scalar};
use std::fmt;

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Booleans.
    Bool,
    /// 64-bit signed integers.
    Int,
    /// 64-bit floats.
    Float,
    /// Fixed-width byte text.
    Text,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ElementKind::Bool => "bool",
            ElementKind::Int => "int64",
            ElementKind::Float => "float64",
            ElementKind::Text => "fixed-width text",
        };
        write!(f, "{}", label)
    }
}

/// Flat element buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Elements {
    /// Boolean elements.
    Bool(Vec<bool>),
    /// Integer elements.
    Int(Vec<i64>),
    /// Float elements.
    Float(Vec<f64>),
    /// Text elements, each at most `width` bytes.
    Text {
        /// Fixed element width in bytes.
        width: usize,
        /// Element values.
        values: Vec<String>,
    },
}

impl Elements {
    /// Number of elements in the buffer.
    pub fn len(&self) -> usize {
        match self {
            Elements::Bool(v) => v.len(),
            Elements::Int(v) => v.len(),
            Elements::Float(v) => v.len(),
            Elements::Text { values, .. } => values.len(),
        }
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element kind.
    pub fn kind(&self) -> ElementKind {
        match self {
            Elements::Bool(_) => ElementKind::Bool,
            Elements::Int(_) => ElementKind::Int,
            Elements::Float(_) => ElementKind::Float,
            Elements::Text { .. } => ElementKind::Text,
        }
    }
}

/// Row-major n-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Vec<usize>,
    elements: Elements,
}

impl Array {
    /// Build an array, returning `None` if the shape does not match the element count.
    pub fn new(shape: Vec<usize>, elements: Elements) -> Option<Self> {
        let expected: usize = shape.iter().product();
        (expected == elements.len()).then_some(Self { shape, elements })
    }

    /// Zero-dimensional array holding one scalar.
    pub fn scalar(value: &Scalar) -> Self {
        let elements = match value {
            Scalar::Bool(b) => Elements::Bool(vec![*b]),
            Scalar::Int(i) => Elements::Int(vec![*i]),
            Scalar::Float(f) => Elements::Float(vec![*f]),
            Scalar::Text(s) => Elements::Text {
                width: s.len().max(1),
                values: vec![s.clone()],
            },
        };
        Self {
            shape: Vec::new(),
            elements,
        }
    }

    /// Scalar text.
    pub fn text(s: impl Into<String>) -> Self {
        Self::scalar(&Scalar::Text(s.into()))
    }

    /// Scalar float.
    pub fn float(v: f64) -> Self {
        Self::scalar(&Scalar::Float(v))
    }

    /// One-dimensional fixed-width text array.
    pub fn texts<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        Self {
            shape: vec![values.len()],
            elements: Elements::Text {
                width: text_width(&values),
                values,
            },
        }
    }

    /// One-dimensional text array at least `width` bytes wide.
    pub fn texts_with_width<S: Into<String>>(values: impl IntoIterator<Item = S>, width: usize) -> Self {
        let mut array = Self::texts(values);
        if let Elements::Text { width: w, .. } = &mut array.elements {
            *w = (*w).max(width);
        }
        array
    }

    /// One-dimensional float array.
    pub fn floats(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            elements: Elements::Float(values),
        }
    }

    /// Convert a sequence of metadata values into a typed array.
    ///
    /// Elements may be scalars or uniformly shaped nested sequences. Element
    /// kinds are promoted the way numeric arrays usually are: any text makes
    /// the whole array text, otherwise any float makes it float, otherwise
    /// integers (booleans widen to integers when mixed). Returns `None` for
    /// ragged nesting, nulls, or mappings.
    pub fn from_values(values: &[MetaValue]) -> Option<Self> {
        let mut shape = vec![values.len()];
        let mut leaves = Vec::new();
        if let Some(first) = values.first() {
            let inner = shape_of(first)?;
            for v in values {
                if shape_of(v)? != inner {
                    return None;
                }
                flatten_into(v, &mut leaves);
            }
            shape.extend(inner);
        }
        Some(Self {
            shape,
            elements: promote(&leaves),
        })
    }

    /// Like [`Array::from_values`], but always produces fixed-width text.
    pub fn from_values_as_text(values: &[MetaValue]) -> Option<Self> {
        let array = Self::from_values(values)?;
        Some(array.into_text())
    }

    fn into_text(self) -> Self {
        let values: Vec<String> = match self.elements {
            Elements::Text { values, .. } => values,
            Elements::Bool(v) => v.iter().map(|b| Scalar::Bool(*b).to_text()).collect(),
            Elements::Int(v) => v.iter().map(|i| i.to_string()).collect(),
            Elements::Float(v) => v.iter().map(|f| Scalar::Float(*f).to_text()).collect(),
        };
        Self {
            shape: self.shape,
            elements: Elements::Text {
                width: text_width(&values),
                values,
            },
        }
    }

    /// Full shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Shape of one record (everything past the leading axis).
    pub fn record_shape(&self) -> &[usize] {
        self.shape.get(1..).unwrap_or(&[])
    }

    /// Length of the leading axis; scalars count as one record.
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Element kind.
    pub fn kind(&self) -> ElementKind {
        self.elements.kind()
    }

    /// Element buffer.
    pub fn elements(&self) -> &Elements {
        &self.elements
    }

    /// Text width in bytes, for text arrays.
    pub fn text_width(&self) -> Option<usize> {
        match &self.elements {
            Elements::Text { width, .. } => Some(*width),
            _ => None,
        }
    }

    /// Float elements, if this is a float array.
    pub fn as_floats(&self) -> Option<&[f64]> {
        match &self.elements {
            Elements::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Integer elements, if this is an integer array.
    pub fn as_ints(&self) -> Option<&[i64]> {
        match &self.elements {
            Elements::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Text elements, if this is a text array.
    pub fn as_texts(&self) -> Option<&[String]> {
        match &self.elements {
            Elements::Text { values, .. } => Some(values),
            _ => None,
        }
    }

    /// Single text value of a scalar or one-element text array.
    pub fn as_text(&self) -> Option<&str> {
        match self.as_texts() {
            Some([only]) => Some(only),
            _ => None,
        }
    }

    fn row_len(&self) -> usize {
        self.record_shape().iter().product()
    }

    /// Convert the elements to `kind`, as an assignment into a typed column would.
    ///
    /// Numeric kinds convert between each other; text only converts to text
    /// of the given width. Returns the converted array and whether any text
    /// element had to be truncated.
    pub fn cast_to(&self, kind: ElementKind, width: Option<usize>) -> Option<(Self, bool)> {
        let mut truncated = false;
        let elements = match (&self.elements, kind) {
            (Elements::Text { values, .. }, ElementKind::Text) => {
                let width = width.unwrap_or_else(|| text_width(values));
                let values = values
                    .iter()
                    .map(|s| {
                        let cut = truncate_to_width(s, width);
                        truncated |= cut.len() < s.len();
                        cut.to_string()
                    })
                    .collect();
                Elements::Text { width, values }
            }
            (Elements::Text { .. }, _) | (_, ElementKind::Text) => return None,
            (Elements::Float(v), ElementKind::Float) => Elements::Float(v.clone()),
            (Elements::Int(v), ElementKind::Float) => {
                Elements::Float(v.iter().map(|i| *i as f64).collect())
            }
            (Elements::Bool(v), ElementKind::Float) => {
                Elements::Float(v.iter().map(|b| f64::from(u8::from(*b))).collect())
            }
            (Elements::Int(v), ElementKind::Int) => Elements::Int(v.clone()),
            (Elements::Float(v), ElementKind::Int) => {
                Elements::Int(v.iter().map(|f| *f as i64).collect())
            }
            (Elements::Bool(v), ElementKind::Int) => {
                Elements::Int(v.iter().map(|b| i64::from(*b)).collect())
            }
            (Elements::Bool(v), ElementKind::Bool) => Elements::Bool(v.clone()),
            (Elements::Int(v), ElementKind::Bool) => Elements::Bool(v.iter().map(|i| *i != 0).collect()),
            (Elements::Float(v), ElementKind::Bool) => {
                Elements::Bool(v.iter().map(|f| *f != 0.0).collect())
            }
        };
        Some((
            Self {
                shape: self.shape.clone(),
                elements,
            },
            truncated,
        ))
    }

    /// Grow or shrink the leading axis to `rows`, filling new rows with zero values.
    pub fn resize_rows(&mut self, rows: usize) {
        let row = self.row_len();
        let target = rows * row;
        match &mut self.elements {
            Elements::Bool(v) => v.resize(target, false),
            Elements::Int(v) => v.resize(target, 0),
            Elements::Float(v) => v.resize(target, 0.0),
            Elements::Text { values, .. } => values.resize(target, String::new()),
        }
        if let Some(first) = self.shape.first_mut() {
            *first = rows;
        }
    }

    /// Overwrite rows starting at `offset` with the rows of `other`.
    ///
    /// `other` must already have this array's kind and record shape, and must fit.
    pub fn write_rows(&mut self, offset: usize, other: &Array) -> bool {
        let row = self.row_len();
        if other.record_shape() != self.record_shape()
            || other.kind() != self.kind()
            || offset + other.rows() > self.rows()
        {
            return false;
        }
        let start = offset * row;
        match (&mut self.elements, &other.elements) {
            (Elements::Bool(dst), Elements::Bool(src)) => {
                dst[start..start + src.len()].clone_from_slice(src)
            }
            (Elements::Int(dst), Elements::Int(src)) => {
                dst[start..start + src.len()].clone_from_slice(src)
            }
            (Elements::Float(dst), Elements::Float(src)) => {
                dst[start..start + src.len()].clone_from_slice(src)
            }
            (Elements::Text { values: dst, .. }, Elements::Text { values: src, .. }) => {
                dst[start..start + src.len()].clone_from_slice(src)
            }
            _ => return false,
        }
        true
    }
}

fn shape_of(value: &MetaValue) -> Option<Vec<usize>> {
    match value {
        MetaValue::Scalar(_) => Some(Vec::new()),
        MetaValue::Sequence(items) => {
            let mut shape = vec![items.len()];
            if let Some(first) = items.first() {
                let inner = shape_of(first)?;
                for item in &items[1..] {
                    if shape_of(item)? != inner {
                        return None;
                    }
                }
                shape.extend(inner);
            }
            Some(shape)
        }
        MetaValue::Null | MetaValue::Mapping(_) | MetaValue::Record(..) => None,
    }
}

fn flatten_into<'a>(value: &'a MetaValue, out: &mut Vec<&'a Scalar>) {
    match value {
        MetaValue::Scalar(s) => out.push(s),
        MetaValue::Sequence(items) => items.iter().for_each(|i| flatten_into(i, out)),
        // unreachable after shape_of succeeded
        MetaValue::Null | MetaValue::Mapping(_) | MetaValue::Record(..) => {}
    }
}

fn promote(leaves: &[&Scalar]) -> Elements {
    let has = |pred: fn(&Scalar) -> bool| leaves.iter().any(|s| pred(s));
    if has(|s| matches!(s, Scalar::Text(_))) {
        let values: Vec<String> = leaves.iter().map(|s| s.to_text()).collect();
        Elements::Text {
            width: text_width(&values),
            values,
        }
    } else if has(|s| matches!(s, Scalar::Float(_))) || leaves.is_empty() {
        Elements::Float(leaves.iter().filter_map(|s| float_of(s)).collect())
    } else if has(|s| matches!(s, Scalar::Int(_))) {
        Elements::Int(
            leaves
                .iter()
                .map(|s| match s {
                    Scalar::Int(i) => *i,
                    Scalar::Bool(b) => i64::from(*b),
                    _ => 0,
                })
                .collect(),
        )
    } else {
        Elements::Bool(
            leaves
                .iter()
                .map(|s| matches!(s, Scalar::Bool(true)))
                .collect(),
        )
    }
}

fn float_of(s: &Scalar) -> Option<f64> {
    match s {
        Scalar::Bool(b) => Some(f64::from(u8::from(*b))),
        other => other.as_f64(),
    }
}

/// Byte width needed to store every value without truncation (at least one).
pub fn text_width(values: &[String]) -> usize {
    values.iter().map(String::len).max().unwrap_or(0).max(1)
}

/// Longest prefix of `s` that fits in `width` bytes without splitting a character.
pub fn truncate_to_width(s: &str, width: usize) -> &str {
    if s.len() <= width {
        return s;
    }
    let mut end = width;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(v: serde_json::Value) -> Vec<MetaValue> {
        match MetaValue::from(v) {
            MetaValue::Sequence(items) => items,
            other => vec![other],
        }
    }

    #[test]
    fn numeric_promotion() {
        let a = Array::from_values(&values(json!([1, 2.5, 3]))).unwrap();
        assert_eq!(a.kind(), ElementKind::Float);
        assert_eq!(a.as_floats().unwrap(), &[1.0, 2.5, 3.0]);

        let b = Array::from_values(&values(json!([1, true]))).unwrap();
        assert_eq!(b.as_ints().unwrap(), &[1, 1]);
    }

    #[test]
    fn nested_records_keep_shape() {
        let a = Array::from_values(&values(json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]))).unwrap();
        assert_eq!(a.shape(), &[2, 3]);
        assert_eq!(a.record_shape(), &[3]);
        assert_eq!(a.rows(), 2);
    }

    #[test]
    fn ragged_and_null_are_not_storable() {
        assert!(Array::from_values(&values(json!([[1, 2], [3]]))).is_none());
        assert!(Array::from_values(&values(json!([1, null]))).is_none());
        assert!(Array::from_values(&values(json!([{"a": 1}]))).is_none());
    }

    #[test]
    fn text_is_fixed_width() {
        let a = Array::from_values(&values(json!(["ab", "abcd", 1]))).unwrap();
        assert_eq!(a.text_width(), Some(4));
        assert_eq!(a.as_texts().unwrap(), &["ab", "abcd", "1"]);
    }

    #[test]
    fn cast_truncates_wide_text() {
        let a = Array::texts(["short", "much longer"]);
        let (cast, truncated) = a.cast_to(ElementKind::Text, Some(5)).unwrap();
        assert!(truncated);
        assert_eq!(cast.as_texts().unwrap(), &["short", "much "]);
        assert!(a.cast_to(ElementKind::Float, None).is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_width("aé", 2), "a");
        assert_eq!(truncate_to_width("abc", 10), "abc");
    }

    #[test]
    fn resize_and_write_rows() {
        let mut a = Array::from_values(&values(json!([[1.0, 2.0]]))).unwrap();
        let b = Array::from_values(&values(json!([[3.0, 4.0], [5.0, 6.0]]))).unwrap();
        a.resize_rows(3);
        assert!(a.write_rows(1, &b));
        assert_eq!(a.as_floats().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
