//! The materialized result of a recording session.
//!
//! A `NestedResult` is a flat map from field name to array whose leading dimensions
//! follow the recorded loop shape. Two reserved keys carry the metadata when the
//! result is written to a store:
//!
//! - `__loop_shape__`: the loop shape as a 1-d array of integers.
//! - `__loop_depths__`: a group mapping each field to the number of loop
//!   dimensions leading its array.

use ndarray::{Array1, ArrayD};
use std::collections::BTreeMap;

use crate::error::{LoopError, LoopResult};
use crate::store::StoreValue;
use crate::value::{is_reserved, scalar_array};

/// Reserved key holding the loop shape.
pub const SHAPE_KEY: &str = "__loop_shape__";

/// Reserved key holding the per-field loop depth.
pub const DEPTHS_KEY: &str = "__loop_depths__";

/// Field arrays plus the loop shape they were recorded with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedResult {
    fields: BTreeMap<String, ArrayD<f64>>,
    depths: BTreeMap<String, usize>,
    shape: Vec<usize>,
}

impl NestedResult {
    pub(crate) fn new(
        fields: BTreeMap<String, ArrayD<f64>>,
        depths: BTreeMap<String, usize>,
        shape: Vec<usize>,
    ) -> Self {
        Self {
            fields,
            depths,
            shape,
        }
    }

    /// Loop shape, outermost level first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Array recorded for `name`.
    pub fn get(&self, name: &str) -> LoopResult<&ArrayD<f64>> {
        self.fields
            .get(name)
            .ok_or_else(|| LoopError::MissingField(name.to_string()))
    }

    /// Number of loop dimensions leading the array of `name`.
    pub fn depth(&self, name: &str) -> Option<usize> {
        self.depths.get(name).copied()
    }

    /// Field names in sorted order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// True if `name` was recorded.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub(crate) fn fields(&self) -> &BTreeMap<String, ArrayD<f64>> {
        &self.fields
    }

    pub(crate) fn depths(&self) -> &BTreeMap<String, usize> {
        &self.depths
    }

    /// Encodes the result as a store group with its reserved metadata keys.
    pub fn to_store_value(&self) -> StoreValue {
        let mut group: BTreeMap<String, StoreValue> = self
            .fields
            .iter()
            .map(|(name, array)| (name.clone(), StoreValue::Array(array.clone())))
            .collect();

        let shape: Array1<f64> = self.shape.iter().map(|&n| n as f64).collect();
        group.insert(SHAPE_KEY.to_string(), StoreValue::Array(shape.into_dyn()));

        let depths = self
            .depths
            .iter()
            .map(|(name, &depth)| (name.clone(), StoreValue::Array(scalar_array(depth as f64))))
            .collect();
        group.insert(DEPTHS_KEY.to_string(), StoreValue::Group(depths));

        StoreValue::Group(group)
    }

    /// Decodes a group written by [`NestedResult::to_store_value`].
    ///
    /// Fails with a state error if the group carries no loop shape.
    pub fn from_store_value(value: &StoreValue) -> LoopResult<Self> {
        let parts = StoredLoop::parse(value)?;
        let shape = parts
            .shape
            .ok_or_else(|| LoopError::State("stored loop has no loop shape".to_string()))?;
        Ok(Self {
            fields: parts.fields,
            depths: parts.depths.unwrap_or_default(),
            shape,
        })
    }
}

/// Loop data as found in a store, with optional metadata.
pub(crate) struct StoredLoop {
    pub fields: BTreeMap<String, ArrayD<f64>>,
    pub shape: Option<Vec<usize>>,
    pub depths: Option<BTreeMap<String, usize>>,
}

impl StoredLoop {
    pub fn parse(value: &StoreValue) -> LoopResult<Self> {
        let group = value
            .as_group()
            .ok_or_else(|| LoopError::Store("expected a group for loop data".to_string()))?;

        let mut fields = BTreeMap::new();
        for (name, entry) in group {
            if is_reserved(name) {
                continue;
            }
            let array = entry.as_array().ok_or_else(|| {
                LoopError::Shape(format!("field '{name}' is a group, not an array"))
            })?;
            fields.insert(name.clone(), array.clone());
        }

        let shape = group
            .get(SHAPE_KEY)
            .map(|entry| {
                let array = entry
                    .as_array()
                    .ok_or_else(|| LoopError::Shape("loop shape must be an array".to_string()))?;
                array.iter().map(|&n| to_count(n)).collect::<LoopResult<Vec<_>>>()
            })
            .transpose()?;

        let depths = match group.get(DEPTHS_KEY).and_then(StoreValue::as_group) {
            Some(entries) => {
                let mut depths = BTreeMap::new();
                for (name, entry) in entries {
                    let depth = entry
                        .as_array()
                        .and_then(|array| array.first().copied())
                        .ok_or_else(|| {
                            LoopError::Shape(format!("loop depth of '{name}' is not a number"))
                        })?;
                    depths.insert(name.clone(), to_count(depth)?);
                }
                Some(depths)
            }
            None => None,
        };

        Ok(Self {
            fields,
            shape,
            depths,
        })
    }
}

fn to_count(value: f64) -> LoopResult<usize> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(LoopError::Shape(format!(
            "expected a non-negative integer, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn sample() -> NestedResult {
        let mut fields = BTreeMap::new();
        fields.insert("freq".to_string(), arr1(&[0.1, 0.2, 0.3]).into_dyn());
        fields.insert("y".to_string(), arr2(&[[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]]).into_dyn());
        fields.insert("x".to_string(), arr1(&[7.0, 8.0]).into_dyn());
        let mut depths = BTreeMap::new();
        depths.insert("freq".to_string(), 1);
        depths.insert("y".to_string(), 1);
        depths.insert("x".to_string(), 0);
        NestedResult::new(fields, depths, vec![3])
    }

    #[test]
    fn store_round_trip_preserves_metadata() {
        let result = sample();
        let decoded = NestedResult::from_store_value(&result.to_store_value()).unwrap();
        assert_eq!(decoded, result);
        assert_eq!(decoded.depth("x"), Some(0));
    }

    #[test]
    fn reserved_keys_are_not_fields() {
        let value = sample().to_store_value();
        let decoded = NestedResult::from_store_value(&value).unwrap();
        assert_eq!(decoded.field_names(), vec!["freq", "x", "y"]);
        assert!(!decoded.contains(SHAPE_KEY));
    }

    #[test]
    fn missing_field_is_lookup_error() {
        let err = sample().get("absent").unwrap_err();
        assert_eq!(err, LoopError::MissingField("absent".into()));
    }

    #[test]
    fn missing_shape_is_state_error() {
        let mut group = BTreeMap::new();
        group.insert("y".to_string(), StoreValue::Array(arr1(&[1.0]).into_dyn()));
        let err = NestedResult::from_store_value(&StoreValue::Group(group)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::State);
    }

    #[test]
    fn fractional_shape_is_rejected() {
        let mut group = BTreeMap::new();
        group.insert(SHAPE_KEY.to_string(), StoreValue::Array(arr1(&[2.5]).into_dyn()));
        assert!(StoredLoop::parse(&StoreValue::Group(group)).is_err());
    }
}
