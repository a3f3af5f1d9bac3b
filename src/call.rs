//! Single-entry call form on top of the recorder.
//!
//! Scripts written against the recorder mostly do two things: start a loop and
//! append values inside it. `LoopRecorder::call` accepts either in one place,
//! deciding once from the shape of its arguments:
//!
//! ```
//! use acq_loop::{fields, LoopArgs, LoopRecorder};
//!
//! # fn main() -> acq_loop::LoopResult<()> {
//! let rec = LoopRecorder::new();
//! for freq in rec.call(LoopArgs::Range(vec![1.0, 10.0, 0.5]))? {
//!     rec.call(LoopArgs::Fields(fields! { "freq" => freq }))?;
//! }
//! assert_eq!(rec.finalize()?.get("freq")?.len(), 18);
//! # Ok(())
//! # }
//! ```

use crate::error::{LoopError, LoopResult};
use crate::range::Arange;
use crate::recorder::{LevelIter, LoopRecorder};
use crate::value::Fields;

/// Arguments of a combined loop/append call.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopArgs {
    /// No arguments at all.
    Empty,
    /// Positional numbers: `[stop]`, `[start, stop]` or `[start, stop, step]`.
    Range(Vec<f64>),
    /// An explicit sequence to loop over.
    Values(Vec<f64>),
    /// Named values to append to the current iteration.
    Fields(Fields),
}

/// Source behind a loop started through [`LoopRecorder::call`].
#[derive(Debug, Clone)]
pub enum CallSource {
    /// Evenly spaced values.
    Range(Arange),
    /// Values given explicitly.
    Values(std::vec::IntoIter<f64>),
}

impl Iterator for CallSource {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        match self {
            CallSource::Range(range) => range.next(),
            CallSource::Values(values) => values.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            CallSource::Range(range) => range.size_hint(),
            CallSource::Values(values) => values.size_hint(),
        }
    }
}

/// Outcome of [`LoopRecorder::call`]: a loop to iterate, or an append that
/// iterates as empty.
#[derive(Debug)]
pub struct LoopCall<'a> {
    level: Option<LevelIter<'a, CallSource>>,
}

impl LoopCall<'_> {
    /// True when the call started a loop rather than appending.
    pub fn is_loop(&self) -> bool {
        self.level.is_some()
    }
}

impl Iterator for LoopCall<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        self.level.as_mut()?.next()
    }
}

impl LoopRecorder {
    /// Starts a loop or appends values depending on `args`.
    ///
    /// `LoopArgs::Empty` and an empty `Range` fail with an argument error.
    pub fn call(&self, args: LoopArgs) -> LoopResult<LoopCall<'_>> {
        let source = match args {
            LoopArgs::Empty => {
                return Err(LoopError::Argument(
                    "a loop call needs a source or named values".to_string(),
                ))
            }
            LoopArgs::Fields(fields) => {
                self.append(fields)?;
                return Ok(LoopCall { level: None });
            }
            LoopArgs::Range(args) => CallSource::Range(Arange::from_args(&args)?),
            LoopArgs::Values(values) => CallSource::Values(values.into_iter()),
        };
        Ok(LoopCall {
            level: Some(self.iterate(source)?),
        })
    }
}
