//! Playback of recorded loops.
//!
//! A `LoopView` wraps the field arrays of a recording together with its loop shape
//! and hands the data back with the nesting it was recorded with: iterating yields
//! one child per outer index, indexing by position yields the same child, and
//! slicing yields a narrower view over the outermost dimension.
//!
//! Each field knows how many loop dimensions lead its array. At every step one of
//! three things happens to a field:
//!
//! - **indexed**: it carries this level's dimension, so index `i` is selected;
//! - **broadcast**: that dimension has length 1, so its sole element is selected;
//! - **passed through**: it was recorded outside this level and is unchanged.
//!
//! A selected value that ends up as a one-element vector is unwrapped to a scalar,
//! mirroring the collapse applied while recording.

use ndarray::{ArrayD, Axis, Slice};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use crate::error::{LoopError, LoopResult};
use crate::nested::{NestedResult, StoredLoop};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
struct ViewField {
    array: ArrayD<f64>,
    depth: usize,
}

impl ViewField {
    fn new(array: ArrayD<f64>, shape: Option<&[usize]>, recorded: Option<usize>) -> Self {
        let matched = shape.map_or(0, |shape| {
            array
                .shape()
                .iter()
                .zip(shape)
                .take_while(|(dim, level)| dim == level || **dim == 1)
                .count()
        });
        let depth = recorded.map_or(matched, |recorded| recorded.min(matched));
        Self { array, depth }
    }

    fn leading(&self) -> Option<usize> {
        if self.depth == 0 {
            None
        } else {
            self.array.shape().first().copied()
        }
    }

    fn select(&self, index: usize) -> ViewField {
        let pick = match self.leading() {
            Some(1) => 0,
            Some(len) if index < len => index,
            _ => return self.clone(),
        };

        let mut array = self.array.index_axis(Axis(0), pick).to_owned();
        let mut depth = self.depth - 1;
        if array.ndim() == 1 && array.len() == 1 {
            array = array.index_axis_move(Axis(0), 0);
            depth = 0;
        }
        ViewField { array, depth }
    }

    fn take(&self, positions: &[usize], len: usize) -> ViewField {
        match self.leading() {
            Some(lead) if lead == len && lead > 1 => ViewField {
                array: self.array.select(Axis(0), positions),
                depth: self.depth,
            },
            _ => self.clone(),
        }
    }
}

/// One step of playback: a nested view for multi-level loops, a flat record at
/// the innermost level.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopItem {
    /// Child loop carrying the remaining levels.
    Loop(LoopView),
    /// Leaf values of one innermost iteration.
    Record(Record),
}

impl LoopItem {
    /// Field value regardless of the item kind.
    pub fn get(&self, name: &str) -> LoopResult<&ArrayD<f64>> {
        match self {
            LoopItem::Loop(view) => view.get(name),
            LoopItem::Record(record) => record.get(name),
        }
    }

    /// Returns the nested view, if this item is one.
    pub fn as_view(&self) -> Option<&LoopView> {
        match self {
            LoopItem::Loop(view) => Some(view),
            LoopItem::Record(_) => None,
        }
    }

    /// Returns the record, if this item is one.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            LoopItem::Record(record) => Some(record),
            LoopItem::Loop(_) => None,
        }
    }
}

/// Field values of one innermost iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, ArrayD<f64>>,
}

impl Record {
    /// Value of `name`.
    pub fn get(&self, name: &str) -> LoopResult<&ArrayD<f64>> {
        self.fields
            .get(name)
            .ok_or_else(|| LoopError::MissingField(name.to_string()))
    }

    /// Value of `name` as a number; it must hold exactly one element.
    pub fn scalar(&self, name: &str) -> LoopResult<f64> {
        let array = self.get(name)?;
        match array.len() {
            1 => array
                .first()
                .copied()
                .ok_or_else(|| LoopError::MissingField(name.to_string())),
            n => Err(LoopError::Shape(format!(
                "field '{name}' holds {n} values, not a scalar"
            ))),
        }
    }

    /// Field names in sorted order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }
}

/// Key accepted by [`LoopView::index`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoopIndex<'k> {
    /// A field name; selects the whole array.
    Field(&'k str),
    /// An outer position; selects one child.
    Position(usize),
    /// A range of outer positions; selects a sub-view.
    Range(Slice),
}

impl<'k> From<&'k str> for LoopIndex<'k> {
    fn from(value: &'k str) -> Self {
        LoopIndex::Field(value)
    }
}

impl From<usize> for LoopIndex<'_> {
    fn from(value: usize) -> Self {
        LoopIndex::Position(value)
    }
}

impl From<Slice> for LoopIndex<'_> {
    fn from(value: Slice) -> Self {
        LoopIndex::Range(value)
    }
}

impl From<Range<usize>> for LoopIndex<'_> {
    fn from(value: Range<usize>) -> Self {
        LoopIndex::Range(Slice::from(value))
    }
}

/// Result of [`LoopView::index`].
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<'v> {
    /// Full array of a field.
    Field(&'v ArrayD<f64>),
    /// One child, as yielded by iteration.
    Item(LoopItem),
    /// A sub-view over a range of outer positions.
    View(LoopView),
}

/// Read-only, shape-aware projection of a recorded loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopView {
    fields: BTreeMap<String, ViewField>,
    shape: Option<Vec<usize>>,
}

impl LoopView {
    /// Builds a view from field arrays and an optional loop shape. The loop depth
    /// of each field is inferred from how its leading dimensions match the shape.
    pub fn new(fields: BTreeMap<String, ArrayD<f64>>, shape: Option<Vec<usize>>) -> Self {
        Self::with_depths(fields, shape, None)
    }

    /// Builds a view over a finished or snapshotted recording.
    pub fn from_result(result: &NestedResult) -> Self {
        Self::with_depths(
            result.fields().clone(),
            Some(result.shape().to_vec()),
            Some(result.depths()),
        )
    }

    /// Reads the loop stored under `key`, with its reserved shape metadata.
    pub fn from_store<S: Store + ?Sized>(store: &S, key: &str) -> LoopResult<Self> {
        let value = store
            .get(key)
            .ok_or_else(|| LoopError::MissingField(key.to_string()))?;
        let stored = StoredLoop::parse(value)?;
        Ok(Self::with_depths(
            stored.fields,
            stored.shape,
            stored.depths.as_ref(),
        ))
    }

    fn with_depths(
        fields: BTreeMap<String, ArrayD<f64>>,
        shape: Option<Vec<usize>>,
        depths: Option<&BTreeMap<String, usize>>,
    ) -> Self {
        let fields = fields
            .into_iter()
            .map(|(name, array)| {
                let recorded = depths.and_then(|depths| depths.get(&name).copied());
                let field = ViewField::new(array, shape.as_deref(), recorded);
                (name, field)
            })
            .collect();
        Self { fields, shape }
    }

    /// Loop shape, outermost level first, if one is set.
    pub fn shape(&self) -> Option<&[usize]> {
        self.shape.as_deref()
    }

    /// Length of the outermost level.
    pub fn len(&self) -> LoopResult<usize> {
        self.outer_len()
            .ok_or_else(|| LoopError::State("loop shape is not set".to_string()))
    }

    /// True when the outermost level has no iterations.
    pub fn is_empty(&self) -> LoopResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Field names in sorted order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Full array of a field.
    pub fn get(&self, name: &str) -> LoopResult<&ArrayD<f64>> {
        self.fields
            .get(name)
            .map(|field| &field.array)
            .ok_or_else(|| LoopError::MissingField(name.to_string()))
    }

    /// Iterates over the outermost level. Every call starts from the beginning.
    pub fn iter(&self) -> LoopResult<LoopIter<'_>> {
        let len = self.len()?;
        Ok(LoopIter {
            view: self,
            index: 0,
            len,
        })
    }

    /// Child at outer position `index`, identical to the item iteration yields.
    pub fn at(&self, index: usize) -> LoopResult<LoopItem> {
        let len = self.outer_len().ok_or_else(|| {
            LoopError::Shape("cannot index a loop view without a loop shape".to_string())
        })?;
        if index >= len {
            return Err(LoopError::IndexOutOfRange { index, len });
        }
        Ok(self.child(index))
    }

    /// Sub-view over a range of outer positions; inner levels are unchanged.
    ///
    /// Negative bounds count from the end and are clamped like Python slices. The
    /// step must be positive.
    pub fn slice(&self, slice: Slice) -> LoopResult<LoopView> {
        let shape = self.shape.as_deref().filter(|shape| !shape.is_empty()).ok_or_else(|| {
            LoopError::Shape("cannot slice a loop view without a loop shape".to_string())
        })?;
        let len = shape[0];
        let positions = resolve(slice, len)?;

        let fields = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field.take(&positions, len)))
            .collect();

        let mut new_shape = Vec::with_capacity(shape.len());
        new_shape.push(positions.len());
        new_shape.extend_from_slice(&shape[1..]);

        Ok(LoopView {
            fields,
            shape: Some(new_shape),
        })
    }

    /// Dispatches on the kind of key: field name, position or range.
    pub fn index<'k>(&self, key: impl Into<LoopIndex<'k>>) -> LoopResult<Selection<'_>> {
        match key.into() {
            LoopIndex::Field(name) => self.get(name).map(Selection::Field),
            LoopIndex::Position(index) => self.at(index).map(Selection::Item),
            LoopIndex::Range(slice) => self.slice(slice).map(Selection::View),
        }
    }

    fn outer_len(&self) -> Option<usize> {
        self.shape.as_ref().and_then(|shape| shape.first().copied())
    }

    fn child(&self, index: usize) -> LoopItem {
        let fields: BTreeMap<String, ViewField> = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field.select(index)))
            .collect();

        match self.shape.as_deref() {
            Some(shape) if shape.len() > 1 => LoopItem::Loop(LoopView {
                fields,
                shape: Some(shape[1..].to_vec()),
            }),
            _ => LoopItem::Record(Record {
                fields: fields
                    .into_iter()
                    .map(|(name, field)| (name, field.array))
                    .collect(),
            }),
        }
    }
}

impl fmt::Display for LoopView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoopView(shape=")?;
        match &self.shape {
            Some(shape) => write!(f, "{shape:?}")?,
            None => write!(f, "unset")?,
        }
        write!(f, ", fields=[{}])", self.field_names().join(", "))
    }
}

impl<'v> IntoIterator for &'v LoopView {
    type Item = LoopItem;
    type IntoIter = LoopIter<'v>;

    /// Iterates the outermost level; a view without a shape yields nothing.
    fn into_iter(self) -> LoopIter<'v> {
        let len = self.outer_len().unwrap_or(0);
        LoopIter {
            view: self,
            index: 0,
            len,
        }
    }
}

/// Iterator over the outermost level of a [`LoopView`].
#[derive(Debug, Clone)]
pub struct LoopIter<'v> {
    view: &'v LoopView,
    index: usize,
    len: usize,
}

impl Iterator for LoopIter<'_> {
    type Item = LoopItem;

    fn next(&mut self) -> Option<LoopItem> {
        if self.index >= self.len {
            return None;
        }
        let item = self.view.child(self.index);
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for LoopIter<'_> {}

/// Positions selected by `slice` out of `len`, Python slice semantics.
fn resolve(slice: Slice, len: usize) -> LoopResult<Vec<usize>> {
    if slice.step <= 0 {
        return Err(LoopError::Argument(format!(
            "slice step must be positive, got {}",
            slice.step
        )));
    }
    let len = len as isize;
    let clamp = |bound: isize| {
        if bound < 0 {
            (bound + len).max(0)
        } else {
            bound.min(len)
        }
    };
    let start = clamp(slice.start);
    let end = slice.end.map_or(len, clamp);

    Ok((start..end)
        .step_by(slice.step as usize)
        .map(|position| position as usize)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr0, arr1, arr2};

    fn freq_view() -> LoopView {
        let mut fields = BTreeMap::new();
        fields.insert("freq".to_string(), arr1(&[0.0, 0.1, 0.2, 0.3, 0.4, 0.5]).into_dyn());
        fields.insert(
            "y".to_string(),
            arr2(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0], [5.0, 5.0]])
                .into_dyn(),
        );
        fields.insert("x".to_string(), arr1(&[10.0, 20.0]).into_dyn());
        LoopView::new(fields, Some(vec![6]))
    }

    #[test]
    fn iteration_matches_indexing() {
        let view = freq_view();
        assert_eq!(view.len().unwrap(), 6);
        for (i, item) in view.iter().unwrap().enumerate() {
            assert_eq!(item, view.at(i).unwrap());
        }
    }

    #[test]
    fn leaf_records_hold_selected_values() {
        let view = freq_view();
        let record = view.at(2).unwrap();
        let record = record.as_record().unwrap();
        assert_eq!(record.scalar("freq").unwrap(), 0.2);
        assert_eq!(record.get("y").unwrap(), &arr1(&[2.0, 2.0]).into_dyn());
        assert_eq!(record.get("x").unwrap(), &arr1(&[10.0, 20.0]).into_dyn());
    }

    #[test]
    fn slice_then_index_composes() {
        let view = freq_view();
        let sliced = view.slice(Slice::new(1, Some(6), 2)).unwrap();
        assert_eq!(sliced.shape(), Some(&[3][..]));
        for j in 0..3 {
            assert_eq!(sliced.at(j).unwrap(), view.at(1 + j * 2).unwrap());
        }
    }

    #[test]
    fn slice_uses_actual_count_for_uneven_steps() {
        let view = freq_view();
        let sliced = view.slice(Slice::new(0, None, 4)).unwrap();
        assert_eq!(sliced.len().unwrap(), 2);
        assert_eq!(sliced.get("freq").unwrap(), &arr1(&[0.0, 0.4]).into_dyn());
    }

    #[test]
    fn negative_bounds_count_from_end() {
        let view = freq_view();
        let tail = view.slice(Slice::new(-2, None, 1)).unwrap();
        assert_eq!(tail.get("freq").unwrap(), &arr1(&[0.4, 0.5]).into_dyn());
        let empty = view.slice(Slice::new(4, Some(2), 1)).unwrap();
        assert_eq!(empty.len().unwrap(), 0);
    }

    #[test]
    fn non_positive_step_is_argument_error() {
        let view = freq_view();
        let err = view.slice(Slice::new(0, None, -1)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Argument);
    }

    #[test]
    fn index_dispatches_on_key() {
        let view = freq_view();
        assert!(matches!(view.index("x").unwrap(), Selection::Field(_)));
        assert!(matches!(
            view.index(3usize).unwrap(),
            Selection::Item(LoopItem::Record(_))
        ));
        assert!(matches!(view.index(1usize..3).unwrap(), Selection::View(_)));
        assert!(matches!(
            view.index(Slice::new(0, None, 2)),
            Ok(Selection::View(_))
        ));
    }

    #[test]
    fn missing_field_and_position() {
        let view = freq_view();
        assert_eq!(
            view.get("nope").unwrap_err(),
            LoopError::MissingField("nope".into())
        );
        assert_eq!(
            view.at(6).unwrap_err(),
            LoopError::IndexOutOfRange { index: 6, len: 6 }
        );
    }

    #[test]
    fn no_shape_means_no_length() {
        let mut fields = BTreeMap::new();
        fields.insert("y".to_string(), arr1(&[1.0, 2.0]).into_dyn());
        let view = LoopView::new(fields, None);

        assert_eq!(view.len().unwrap_err().kind(), crate::error::ErrorKind::State);
        assert!(view.iter().is_err());
        assert_eq!(view.at(0).unwrap_err().kind(), crate::error::ErrorKind::Shape);
        assert_eq!(
            view.slice(Slice::from(0..1)).unwrap_err().kind(),
            crate::error::ErrorKind::Shape
        );
        assert_eq!((&view).into_iter().count(), 0);
    }

    #[test]
    fn two_level_view_yields_nested_views() {
        let mut fields = BTreeMap::new();
        fields.insert("tau".to_string(), arr1(&[0.0, 0.5, 1.0]).into_dyn());
        fields.insert(
            "freq".to_string(),
            arr2(&[[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]]).into_dyn(),
        );
        let view = LoopView::new(fields, Some(vec![3, 2]));

        let mut count = 0;
        for (i, item) in view.iter().unwrap().enumerate() {
            let inner = item.as_view().unwrap();
            assert_eq!(inner.len().unwrap(), 2);
            for (j, leaf) in inner.iter().unwrap().enumerate() {
                let leaf = leaf.as_record().unwrap();
                assert_eq!(leaf.scalar("tau").unwrap(), [0.0, 0.5, 1.0][i]);
                assert_eq!(leaf.scalar("freq").unwrap(), [1.0, 2.0][j]);
                count += 1;
            }
        }
        assert_eq!(count, 6);
    }

    #[test]
    fn length_one_dimension_broadcasts() {
        let mut fields = BTreeMap::new();
        fields.insert("gain".to_string(), arr1(&[3.0]).into_dyn());
        fields.insert("y".to_string(), arr1(&[1.0, 2.0, 3.0]).into_dyn());
        let view = LoopView::new(fields, Some(vec![3]));

        for item in view.iter().unwrap() {
            assert_eq!(item.get("gain").unwrap(), &arr0(3.0).into_dyn());
        }
    }

    #[test]
    fn display_lists_shape_and_fields() {
        assert_eq!(
            freq_view().to_string(),
            "LoopView(shape=[6], fields=[freq, x, y])"
        );
    }
}
