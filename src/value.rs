//! Tagged values recorded during a loop.
//!
//! Every value handed to the recorder is tagged once, at append time, as a scalar,
//! a fixed-shape array or a collection of further values, so the array builder can
//! match on the tag instead of inspecting the value at runtime.

use ndarray::{Array1, ArrayD, IxDyn};

/// Prefix marking internal metadata keys in a recorded result.
pub const RESERVED_PREFIX: &str = "__";

/// Returns true when `name` is reserved for metadata.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// A raw value appended for one iteration of a loop level.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A single number.
    Scalar(f64),
    /// A regular array with a fixed shape.
    Array(ArrayD<f64>),
    /// A collection whose items are merged into one array.
    List(Vec<Value>),
}

impl Value {
    /// Shape of the value before any merging. Lists report their own length
    /// followed by the shape of their first item.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Scalar(_) => Vec::new(),
            Value::Array(array) => array.shape().to_vec(),
            Value::List(items) => {
                let mut shape = vec![items.len()];
                if let Some(first) = items.first() {
                    shape.extend(first.shape());
                }
                shape
            }
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Scalar(f64::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Scalar(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Scalar(value as f64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Scalar(f64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Scalar(value as f64)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Array(Array1::from(value).into_dyn())
    }
}

impl From<&[f64]> for Value {
    fn from(value: &[f64]) -> Self {
        Value::from(value.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for Value {
    fn from(value: [f64; N]) -> Self {
        Value::from(value.to_vec())
    }
}

impl From<Array1<f64>> for Value {
    fn from(value: Array1<f64>) -> Self {
        Value::Array(value.into_dyn())
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(value: ArrayD<f64>) -> Self {
        Value::Array(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

/// Named values recorded by a single `append` call, in call order.
pub type Fields = Vec<(String, Value)>;

/// Builds [`Fields`] from `name => value` pairs.
///
/// ```
/// use acq_loop::fields;
///
/// let row = fields! { "freq" => 0.1, "y" => vec![0.0, 1.0, 2.0] };
/// assert_eq!(row.len(), 2);
/// assert_eq!(row[0].0, "freq");
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::value::Fields::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        vec![$((::std::string::String::from($name), $crate::value::Value::from($value))),+]
    };
}

/// Wraps a scalar into a 0-d array.
pub(crate) fn scalar_array(value: f64) -> ArrayD<f64> {
    ArrayD::from_elem(IxDyn(&[]), value)
}
