//! Custom error types for loop recording and playback.
//!
//! This module defines `LoopError`, the single error type returned by the recorder,
//! the array builder and the playback view. It is built with `thiserror` and groups
//! failures into four kinds:
//!
//! - **`Argument`**: a loop was requested without a usable source, a step was zero,
//!   or a field name collides with the reserved metadata prefix.
//! - **`Shape`**: per-iteration values that cannot be merged into one regular array,
//!   or a slice against a view whose shape is unknown.
//! - **`State`**: an operation that is not allowed in the current recorder state,
//!   such as appending after `finalize()` or querying the length of a view without
//!   a loop shape.
//! - **`Lookup`**: a missing field name or an out-of-range position.
//!
//! Errors raised by the store adapter are wrapped in `Store`. None of these are
//! retried internally; they surface at the call that detects them.

use thiserror::Error;

/// Convenience alias for results using the loop error type.
pub type LoopResult<T> = std::result::Result<T, LoopError>;

/// Coarse classification of a [`LoopError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unusable call arguments.
    Argument,
    /// Inconsistent or unknown array shapes.
    Shape,
    /// Operation not valid in the current state.
    State,
    /// Missing field or position.
    Lookup,
    /// Failure reported by the store adapter.
    Store,
}

/// Errors raised while recording or replaying nested loops.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoopError {
    /// A call was made with arguments that cannot drive a loop or an append.
    #[error("Invalid loop arguments: {0}")]
    Argument(String),

    /// Values recorded for one field do not share a shape.
    #[error("Field '{field}': value {index} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Field being stacked; empty until the caller names it.
        field: String,
        /// Position of the offending value.
        index: usize,
        /// Shape of the first value.
        expected: Vec<usize>,
        /// Shape of the offending value.
        found: Vec<usize>,
    },

    /// Any other inconsistency between data and loop shape.
    #[error("Shape error: {0}")]
    Shape(String),

    /// The operation is not valid in the current state.
    #[error("Invalid state: {0}")]
    State(String),

    /// No field or store entry under this name.
    #[error("Field not found: {0}")]
    MissingField(String),

    /// An outer position past the end of a loop.
    #[error("Index {index} out of range for loop of length {len}")]
    IndexOutOfRange {
        /// Requested position.
        index: usize,
        /// Length of the outer loop.
        len: usize,
    },

    /// The store adapter rejected a read or write.
    #[error("Store error: {0}")]
    Store(String),
}

impl LoopError {
    /// Returns the error kind used by callers to branch on failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoopError::Argument(_) => ErrorKind::Argument,
            LoopError::ShapeMismatch { .. } | LoopError::Shape(_) => ErrorKind::Shape,
            LoopError::State(_) => ErrorKind::State,
            LoopError::MissingField(_) | LoopError::IndexOutOfRange { .. } => ErrorKind::Lookup,
            LoopError::Store(_) => ErrorKind::Store,
        }
    }

    /// Attaches a field name to a shape mismatch raised without one.
    pub(crate) fn for_field(self, name: &str) -> Self {
        match self {
            LoopError::ShapeMismatch {
                field,
                index,
                expected,
                found,
            } if field.is_empty() => LoopError::ShapeMismatch {
                field: name.to_string(),
                index,
                expected,
                found,
            },
            other => other,
        }
    }
}

impl From<ndarray::ShapeError> for LoopError {
    fn from(value: ndarray::ShapeError) -> Self {
        LoopError::Shape(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_lookup_errors() {
        assert_eq!(
            LoopError::MissingField("y".into()).kind(),
            ErrorKind::Lookup
        );
        assert_eq!(
            LoopError::IndexOutOfRange { index: 4, len: 3 }.kind(),
            ErrorKind::Lookup
        );
    }

    #[test]
    fn names_field_in_shape_mismatch() {
        let err = LoopError::ShapeMismatch {
            field: String::new(),
            index: 2,
            expected: vec![3],
            found: vec![4],
        }
        .for_field("trace");

        assert_eq!(err.kind(), ErrorKind::Shape);
        let message = err.to_string();
        assert!(message.contains("trace"));
        assert!(message.contains("[4]"));
    }

    #[test]
    fn keeps_existing_field_name() {
        let err = LoopError::ShapeMismatch {
            field: "y".into(),
            index: 0,
            expected: vec![],
            found: vec![2],
        }
        .for_field("other");

        match err {
            LoopError::ShapeMismatch { field, .. } => assert_eq!(field, "y"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
