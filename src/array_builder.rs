//! Merging per-iteration values into one regular array.
//!
//! `ArrayBuilder` is stateless. Given the N values recorded for a field at one loop
//! level it produces an array of shape `(N, *inner)`, where `inner` is the shared
//! shape of the values after singleton collapse:
//!
//! ```text
//! [5], [5], [5]          -> [5, 5, 5]        (shape [3], not [3, 1])
//! [0, 1, 2] x 4 rows     -> 4 x 3 array
//! 0.1, [0.2, 0.3]        -> ShapeMismatch
//! ```

use ndarray::{ArrayD, Axis, IxDyn};

use crate::error::{LoopError, LoopResult};
use crate::value::{scalar_array, Value};

/// Stateless builder for regular arrays out of per-iteration values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayBuilder;

impl ArrayBuilder {
    /// Materializes each value and stacks them along a new leading axis.
    ///
    /// Zero values produce an empty array of shape `[0]`; its inner shape is left
    /// unrealized since no element was ever seen.
    pub fn build(values: &[Value]) -> LoopResult<ArrayD<f64>> {
        let arrays = values
            .iter()
            .map(Self::materialize)
            .collect::<LoopResult<Vec<_>>>()?;
        Self::stack(&arrays)
    }

    /// Converts one tagged value into an array, applying singleton collapse.
    pub fn materialize(value: &Value) -> LoopResult<ArrayD<f64>> {
        let array = match value {
            Value::Scalar(v) => scalar_array(*v),
            Value::Array(array) => array.clone(),
            Value::List(items) => Self::build(items)?,
        };
        Ok(Self::collapse(array))
    }

    /// Stacks already materialized arrays, which must all share one shape.
    pub fn stack(arrays: &[ArrayD<f64>]) -> LoopResult<ArrayD<f64>> {
        let Some(first) = arrays.first() else {
            return Ok(ArrayD::zeros(IxDyn(&[0])));
        };
        let inner = first.shape().to_vec();

        let mut data = Vec::with_capacity(arrays.len() * first.len());
        for (index, array) in arrays.iter().enumerate() {
            if array.shape() != inner.as_slice() {
                return Err(LoopError::ShapeMismatch {
                    field: String::new(),
                    index,
                    expected: inner,
                    found: array.shape().to_vec(),
                });
            }
            data.extend(array.iter().copied());
        }

        let mut shape = Vec::with_capacity(inner.len() + 1);
        shape.push(arrays.len());
        shape.extend_from_slice(&inner);
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
    }

    /// Strips trailing axes of length 1, so `[5]` and `[[5]]` become the scalar `5`
    /// and a `3 x 1` column becomes a plain vector of length 3.
    pub fn collapse(mut array: ArrayD<f64>) -> ArrayD<f64> {
        while array.shape().last() == Some(&1) {
            let last = array.ndim() - 1;
            array = array.index_axis_move(Axis(last), 0);
        }
        array
    }
}
