//! # Acquisition Loop Recorder
//!
//! This crate records measurements taken inside arbitrarily nested acquisition loops
//! and replays them with the same nesting. A measurement script drives a
//! [`LoopRecorder`]: every loop it wraps becomes one dimension of the result, and
//! every named value appended inside it becomes an array whose leading axes follow
//! those loops. The finished recording is a [`NestedResult`], which a [`LoopView`]
//! plays back by index, by slice or by iteration.
//!
//! ```
//! use acq_loop::{fields, LoopRecorder, LoopView};
//!
//! # fn main() -> acq_loop::LoopResult<()> {
//! let rec = LoopRecorder::new();
//! for tau in rec.iterate([1.0, 2.0, 3.0])? {
//!     for freq in rec.range(&[0.0, 1.0, 0.25])? {
//!         rec.append(fields! { "tau" => tau, "freq" => freq, "y" => tau * freq })?;
//!     }
//! }
//! let result = rec.finalize()?;
//! assert_eq!(result.shape(), &[3, 4]);
//!
//! let view = LoopView::from_result(&result);
//! let second = view.at(1)?;
//! assert_eq!(second.get("y")?.len(), 4);
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - **`recorder`**: The `LoopRecorder` state machine and the `LevelIter` that wraps
//!   each loop source.
//! - **`call`**: `LoopRecorder::call`, a single entry point that starts a loop or
//!   appends depending on its arguments.
//! - **`view`**: `LoopView` playback: indexing, slicing and iteration over recorded
//!   loops.
//! - **`nested`**: `NestedResult`, the materialized recording, and its store encoding.
//! - **`array_builder`**: Stacking appended values into dense arrays.
//! - **`value`**: The `Value` type accepted by `append` and the `fields!` macro.
//! - **`range`**: `Arange`, the numeric loop source.
//! - **`store`**: The `Store` trait with in-memory and JSON file implementations.
//! - **`config`**: Figment-based `RecorderSettings`.
//! - **`tracing_setup`**: Subscriber initialization for the recorder's log events.
//! - **`error`**: The `LoopError` enum shared by all modules.

pub mod array_builder;
pub mod call;
pub mod config;
pub mod error;
pub mod nested;
pub mod range;
pub mod recorder;
pub mod store;
pub mod tracing_setup;
pub mod value;
pub mod view;

pub use array_builder::ArrayBuilder;
pub use call::{LoopArgs, LoopCall};
pub use error::{ErrorKind, LoopError, LoopResult};
pub use nested::NestedResult;
pub use range::Arange;
pub use recorder::{LevelIter, LoopRecorder, RecorderPhase};
pub use store::{FileStore, MemoryStore, Store, StoreValue};
pub use value::{Fields, Value};
pub use view::{LoopItem, LoopIndex, LoopIter, LoopView, Record, Selection};
