//! Loop recorder: turns appends made inside nested loops into regular arrays.
//!
//! The recorder keeps an explicit stack of level buffers. Index 0 is the top level
//! (outside every loop) and always holds exactly one row; each deeper buffer holds
//! one row per iteration of the loop driving it.
//!
//! ```text
//! for freq in rec.iterate(freqs)? {        level 1, one row per freq
//!     for t in rec.iterate(delays)? {      level 2, one row per delay
//!         rec.append(fields! {"y" => trace})?;
//!     }                                    level 2 closes -> y (K, n) into the level 1 row
//!     rec.append(fields! {"freq" => freq})?;
//! }                                        level 1 closes -> y (M, K, n), freq (M,) at top
//! ```
//!
//! # State Machine
//!
//! ```text
//! Empty ──append / iterate──> Open(level=k) ──finalize──> Closed
//!                               │      ▲
//!                  first item   │      │  source exhausted or iterator dropped
//!                               ▼      │
//!                            Open(level=k+1)
//! ```
//!
//! Loops opened one after another at the same depth, within a single iteration of
//! their parent, share one buffer: their iterations are concatenated. Closing a level
//! materializes all of that buffer's rows into the parent's current row, so closing
//! twice with the same rows is idempotent. A snapshot runs the same flush on a copy
//! of the stack and leaves out a current iteration that does not line up with the
//! finished ones yet.
//!
//! The loop shape is carried by the rows themselves: each row remembers the extent
//! of the loops run inside it, and a level with no fields adds no dimension.

use ndarray::ArrayD;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::array_builder::ArrayBuilder;
use crate::error::{LoopError, LoopResult};
use crate::nested::NestedResult;
use crate::range::Arange;
use crate::store::Store;
use crate::value::{is_reserved, Fields, Value, RESERVED_PREFIX};
use crate::view::LoopView;

/// A value held in a row buffer.
#[derive(Debug, Clone)]
enum Entry {
    /// Appended directly by the caller.
    Raw(Value),
    /// Produced by closing a deeper level; `depth` loop dimensions lead `array`.
    Looped { array: ArrayD<f64>, depth: usize },
}

impl Entry {
    fn depth(&self) -> usize {
        match self {
            Entry::Raw(_) => 0,
            Entry::Looped { depth, .. } => *depth,
        }
    }

    fn to_array(&self) -> LoopResult<ArrayD<f64>> {
        match self {
            Entry::Raw(value) => ArrayBuilder::materialize(value),
            Entry::Looped { array, .. } => Ok(array.clone()),
        }
    }
}

/// Fields recorded during one iteration of a level.
#[derive(Debug, Clone, Default)]
struct Row {
    entries: BTreeMap<String, Entry>,
    /// Loop shape of the levels run inside this iteration.
    extent: Vec<usize>,
}

impl Row {
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct LevelBuffer {
    rows: Vec<Row>,
    open: bool,
}

impl LevelBuffer {
    fn top() -> Self {
        Self {
            rows: vec![Row::default()],
            open: true,
        }
    }

    /// Iterations that recorded at least one field.
    fn iterations(&self) -> usize {
        self.rows.iter().filter(|row| !row.is_empty()).count()
    }
}

/// Stack of level buffers, top level first.
#[derive(Debug, Clone)]
struct Levels {
    buffers: Vec<LevelBuffer>,
}

impl Levels {
    fn new() -> Self {
        Self {
            buffers: vec![LevelBuffer::top()],
        }
    }

    /// Index of the innermost open level; 0 outside every loop.
    fn depth(&self) -> usize {
        self.buffers.iter().rposition(|b| b.open).unwrap_or(0)
    }

    /// Resolves a relative level against the innermost open level, clamping to
    /// the existing range.
    fn target(&self, offset: isize) -> usize {
        let depth = self.depth() as isize;
        (depth + offset).clamp(0, depth) as usize
    }

    fn row_mut(&mut self, level: usize) -> &mut Row {
        let rows = &mut self.buffers[level].rows;
        if rows.is_empty() {
            rows.push(Row::default());
        }
        let last = rows.len() - 1;
        &mut rows[last]
    }

    /// Opens a loop one level below the innermost open one. A closed buffer left
    /// at that depth by a previous sibling loop is reused.
    fn open(&mut self) -> usize {
        let level = self.depth() + 1;
        self.buffers.truncate(level + 1);
        match self.buffers.get_mut(level) {
            Some(buffer) => buffer.open = true,
            None => self.buffers.push(LevelBuffer {
                rows: Vec::new(),
                open: true,
            }),
        }
        level
    }

    /// Starts the next iteration of `level`. Deeper buffers belong to the previous
    /// iteration and were flushed when they closed.
    fn begin_row(&mut self, level: usize) -> LoopResult<()> {
        let depth = self.depth();
        if depth != level {
            return Err(LoopError::State(format!(
                "loop level {level} advanced while the innermost open level is {depth}"
            )));
        }
        self.buffers.truncate(level + 1);
        self.buffers[level].rows.push(Row::default());
        Ok(())
    }

    /// Closes `level` and every level still open inside it, innermost first.
    fn close(&mut self, level: usize) -> LoopResult<()> {
        let mut result = Ok(());
        while level > 0 && self.depth() >= level {
            let depth = self.depth();
            if depth > level {
                warn!(level, inner = depth, "Closing loop level with inner level still open");
            }
            self.buffers.truncate(depth + 1);
            self.buffers[depth].open = false;
            if let Err(err) = self.flush(depth) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// Materializes every field of `level` into the current row of its parent.
    /// Nothing is written if any field fails.
    fn flush(&mut self, level: usize) -> LoopResult<()> {
        if level == 0 || level >= self.buffers.len() {
            return Ok(());
        }
        let stacked = stack_rows(level, &self.buffers[level].rows)?;
        let row = self.row_mut(level - 1);
        row.entries.extend(stacked.entries);
        row.extent = stacked.extent;
        Ok(())
    }

    /// Flushes every level and collects the top-level row.
    fn into_result(mut self) -> LoopResult<NestedResult> {
        for level in (1..self.buffers.len()).rev() {
            self.flush(level)?;
        }
        self.collect()
    }

    /// Like [`Levels::into_result`] for a recording still in progress. The current
    /// iteration of an open level is kept when it stacks with the finished ones and
    /// left out when it does not yet, e.g. while its inner loop is half done.
    fn into_snapshot(mut self) -> LoopResult<NestedResult> {
        let depth = self.depth();
        for level in (1..self.buffers.len()).rev() {
            match self.flush(level) {
                Ok(()) => {}
                Err(err) if level > depth || self.buffers[level].iterations() < 2 => {
                    return Err(err)
                }
                Err(_) => {
                    self.buffers[level].rows.pop();
                    self.flush(level)?;
                }
            }
        }
        self.collect()
    }

    fn collect(&self) -> LoopResult<NestedResult> {
        let mut fields = BTreeMap::new();
        let mut depths = BTreeMap::new();
        let mut shape = Vec::new();
        if let Some(row) = self.buffers.first().and_then(|top| top.rows.last()) {
            for (name, entry) in &row.entries {
                let array = entry.to_array().map_err(|e| e.for_field(name))?;
                fields.insert(name.clone(), array);
                depths.insert(name.clone(), entry.depth());
            }
            shape = row.extent.clone();
        }
        Ok(NestedResult::new(fields, depths, shape))
    }
}

/// Stacks the non-empty rows of `level` into one row for its parent.
///
/// Every field must be present in every non-empty row, and every row must have run
/// the same inner loops. A level without any field contributes no dimension.
fn stack_rows(level: usize, rows: &[Row]) -> LoopResult<Row> {
    let filled: Vec<&Row> = rows.iter().filter(|row| !row.is_empty()).collect();
    let Some(first) = filled.first() else {
        return Ok(Row::default());
    };
    if let Some(row) = filled.iter().find(|row| row.extent != first.extent) {
        return Err(LoopError::Shape(format!(
            "iterations of loop level {level} ran inner loops of shape {:?} and {:?}",
            first.extent, row.extent
        )));
    }

    let mut grouped: BTreeMap<&str, Vec<&Entry>> = BTreeMap::new();
    for row in &filled {
        for (name, entry) in &row.entries {
            grouped.entry(name.as_str()).or_default().push(entry);
        }
    }

    let mut entries = BTreeMap::new();
    for (name, group) in grouped {
        if group.len() != filled.len() {
            return Err(LoopError::Shape(format!(
                "field '{name}' was recorded in {} of {} iterations of loop level {level}",
                group.len(),
                filled.len()
            )));
        }
        let arrays = group
            .iter()
            .map(|entry| entry.to_array())
            .collect::<LoopResult<Vec<_>>>()
            .map_err(|e| e.for_field(name))?;
        let array = ArrayBuilder::stack(&arrays).map_err(|e| e.for_field(name))?;
        let depth = group.iter().map(|entry| entry.depth()).max().unwrap_or(0) + 1;
        entries.insert(name.to_string(), Entry::Looped { array, depth });
    }

    let mut extent = Vec::with_capacity(first.extent.len() + 1);
    extent.push(filled.len());
    extent.extend_from_slice(&first.extent);
    Ok(Row { entries, extent })
}

/// Lifecycle phase of a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    /// Nothing appended and no loop opened yet.
    Empty,
    /// Recording; `level` loops are currently open.
    Open {
        /// Number of open loop levels.
        level: usize,
    },
    /// Finalized; a new recorder is needed to record again.
    Closed,
}

impl fmt::Display for RecorderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderPhase::Empty => write!(f, "Empty"),
            RecorderPhase::Open { level } => write!(f, "Open(level={level})"),
            RecorderPhase::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug)]
struct RecorderState {
    levels: Levels,
    touched: bool,
    closed: Option<NestedResult>,
    deferred: Option<LoopError>,
}

impl RecorderState {
    fn check_open(&mut self) -> LoopResult<()> {
        if self.closed.is_some() {
            return Err(LoopError::State(
                "recorder is finalized; create a new recorder to record again".to_string(),
            ));
        }
        match self.deferred.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn defer(&mut self, err: LoopError) {
        warn!(error = %err, "Loop error deferred to the next recorder call");
        if self.deferred.is_none() {
            self.deferred = Some(err);
        }
    }
}

struct StoreSink {
    key: String,
    store: Box<dyn Store>,
}

/// Accumulates values appended inside nested loops.
///
/// All methods take `&self` so the recorder can drive a loop and receive appends
/// from the loop body at the same time. It is meant for one writer on one thread
/// and is deliberately not `Sync`.
///
/// ```
/// use acq_loop::{fields, LoopRecorder};
///
/// # fn main() -> acq_loop::LoopResult<()> {
/// let rec = LoopRecorder::new();
/// for freq in rec.iterate([0.1, 0.2, 0.3])? {
///     rec.append(fields! { "freq" => freq, "y" => vec![0.0, freq, 2.0 * freq] })?;
/// }
/// let result = rec.finalize()?;
/// assert_eq!(result.shape(), &[3]);
/// assert_eq!(result.get("y")?.shape(), &[3, 3]);
/// # Ok(())
/// # }
/// ```
pub struct LoopRecorder {
    state: RefCell<RecorderState>,
    sink: RefCell<Option<StoreSink>>,
    save_on_edit: bool,
}

impl Default for LoopRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopRecorder")
            .field("phase", &self.phase())
            .field("save_on_edit", &self.save_on_edit)
            .field(
                "store_key",
                &self.sink.borrow().as_ref().map(|sink| sink.key.clone()),
            )
            .finish()
    }
}

impl LoopRecorder {
    /// Creates an empty recorder with no store attached.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(RecorderState {
                levels: Levels::new(),
                touched: false,
                closed: None,
                deferred: None,
            }),
            sink: RefCell::new(None),
            save_on_edit: false,
        }
    }

    /// Attaches a store; [`save`](Self::save) and [`finalize`](Self::finalize)
    /// write the result under `key`.
    pub fn with_store(self, key: impl Into<String>, store: Box<dyn Store>) -> Self {
        *self.sink.borrow_mut() = Some(StoreSink {
            key: key.into(),
            store,
        });
        self
    }

    /// Saves to the attached store after every append and level close.
    pub fn with_save_on_edit(mut self, enabled: bool) -> Self {
        self.save_on_edit = enabled;
        self
    }

    /// Number of loop levels currently open.
    pub fn depth(&self) -> usize {
        self.state.borrow().levels.depth()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RecorderPhase {
        let state = self.state.borrow();
        if state.closed.is_some() {
            RecorderPhase::Closed
        } else if !state.touched {
            RecorderPhase::Empty
        } else {
            RecorderPhase::Open {
                level: state.levels.depth(),
            }
        }
    }

    /// Wraps `source` in a loop level.
    ///
    /// The level opens when the first item is requested and closes when the source
    /// is exhausted or the iterator is dropped. Each yielded item starts a new
    /// iteration row for that level.
    pub fn iterate<S>(&self, source: S) -> LoopResult<LevelIter<'_, S::IntoIter>>
    where
        S: IntoIterator,
    {
        self.state.borrow_mut().check_open()?;
        Ok(LevelIter {
            recorder: self,
            source: source.into_iter(),
            level: None,
            done: false,
        })
    }

    /// Loops over a numeric range given as `[stop]`, `[start, stop]` or
    /// `[start, stop, step]`. No arguments is an argument error.
    pub fn range(&self, args: &[f64]) -> LoopResult<LevelIter<'_, Arange>> {
        let source = Arange::from_args(args)?;
        self.iterate(source)
    }

    /// Records fields for the current iteration of the innermost open loop.
    pub fn append(&self, fields: Fields) -> LoopResult<()> {
        self.append_at(0, fields)
    }

    /// Records fields at a level relative to the innermost open loop.
    ///
    /// `0` is the innermost loop, `-1` its parent and so on. Levels beyond the top
    /// level clamp to it; positive levels clamp to the innermost loop. Appending a
    /// field twice in the same iteration keeps the last value.
    pub fn append_at(&self, level: isize, fields: Fields) -> LoopResult<()> {
        if fields.is_empty() {
            return Err(LoopError::Argument(
                "append needs at least one named value".to_string(),
            ));
        }
        if let Some((name, _)) = fields.iter().find(|(name, _)| is_reserved(name)) {
            return Err(LoopError::Argument(format!(
                "field name '{name}' uses the reserved prefix '{RESERVED_PREFIX}'"
            )));
        }

        {
            let mut state = self.state.borrow_mut();
            state.check_open()?;
            let target = state.levels.target(level);
            let depth = state.levels.depth();
            if level > 0 || depth as isize + level < 0 {
                warn!(level, depth, target, "Append level out of range, clamped");
            }
            let row = state.levels.row_mut(target);
            for (name, value) in fields {
                row.entries.insert(name, Entry::Raw(value));
            }
            state.touched = true;
        }

        self.autosave();
        Ok(())
    }

    /// Materializes all levels without closing them.
    ///
    /// Finished iterations are always included. The current iteration of an open
    /// loop is included once it lines up with the finished ones; the first iteration
    /// is included as it stands. Recording can continue afterwards; later appends to
    /// the current iteration replace the values captured here.
    pub fn snapshot(&self) -> LoopResult<NestedResult> {
        let mut state = self.state.borrow_mut();
        if let Some(result) = &state.closed {
            return Ok(result.clone());
        }
        if let Some(err) = state.deferred.take() {
            return Err(err);
        }
        state.levels.clone().into_snapshot()
    }

    /// Playback view over the current snapshot.
    pub fn view(&self) -> LoopResult<LoopView> {
        Ok(LoopView::from_result(&self.snapshot()?))
    }

    /// Writes the current snapshot to the attached store.
    pub fn save(&self) -> LoopResult<()> {
        let result = self.snapshot()?;
        self.write(&result)
    }

    fn write(&self, result: &NestedResult) -> LoopResult<()> {
        let mut sink = self.sink.borrow_mut();
        let sink = sink
            .as_mut()
            .ok_or_else(|| LoopError::State("no store attached to the recorder".to_string()))?;
        sink.store.set(&sink.key, result.to_store_value())?;
        debug!(key = %sink.key, shape = ?result.shape(), "Saved loop snapshot");
        Ok(())
    }

    /// Closes every open level, innermost first, and returns the final result.
    ///
    /// The recorder is closed afterwards. Calling `finalize` again returns the
    /// same result.
    pub fn finalize(&self) -> LoopResult<NestedResult> {
        let result = {
            let mut state = self.state.borrow_mut();
            if let Some(result) = &state.closed {
                return Ok(result.clone());
            }
            if let Some(err) = state.deferred.take() {
                return Err(err);
            }
            state.levels.close(1)?;
            let result = state.levels.clone().into_result()?;
            state.closed = Some(result.clone());
            state.levels = Levels::new();
            result
        };

        info!(
            shape = ?result.shape(),
            fields = result.field_names().len(),
            "Finalized loop recording"
        );

        if let Some(sink) = self.sink.borrow_mut().as_mut() {
            sink.store.set(&sink.key, result.to_store_value())?;
        }
        Ok(result)
    }

    /// Consumes the recorder and hands back its store, if any.
    pub fn into_store(self) -> Option<Box<dyn Store>> {
        self.sink.into_inner().map(|sink| sink.store)
    }

    /// Saves after an edit when enabled. Failures are logged and never fail the
    /// edit itself; deferred errors are left for the caller.
    fn autosave(&self) {
        if !self.save_on_edit || self.sink.borrow().is_none() {
            return;
        }
        let snapshot = self.state.borrow().levels.clone().into_snapshot();
        if let Err(err) = snapshot.and_then(|result| self.write(&result)) {
            warn!(error = %err, "Save on edit failed, recording continues");
        }
    }

    fn open_level(&self) -> Option<usize> {
        let mut state = self.state.borrow_mut();
        if state.closed.is_some() {
            return None;
        }
        state.touched = true;
        let level = state.levels.open();
        debug!(level, "Opened loop level");
        Some(level)
    }

    fn begin_row(&self, level: usize) {
        let mut state = self.state.borrow_mut();
        if state.closed.is_some() {
            return;
        }
        if let Err(err) = state.levels.begin_row(level) {
            state.defer(err);
        }
    }

    fn close_level(&self, level: usize) {
        let closed = {
            let mut state = self.state.borrow_mut();
            if state.closed.is_some() {
                return;
            }
            let iterations = state
                .levels
                .buffers
                .get(level)
                .map(LevelBuffer::iterations)
                .unwrap_or(0);
            match state.levels.close(level) {
                Ok(()) => {
                    debug!(level, iterations, "Closed loop level");
                    true
                }
                Err(err) => {
                    state.defer(err);
                    false
                }
            }
        };

        if closed {
            self.autosave();
        }
    }
}

/// Iterator driving one loop level of a [`LoopRecorder`].
///
/// Returned by [`LoopRecorder::iterate`] and [`LoopRecorder::range`].
pub struct LevelIter<'a, I> {
    recorder: &'a LoopRecorder,
    source: I,
    level: Option<usize>,
    done: bool,
}

impl<I> LevelIter<'_, I> {
    /// Level index once the loop has started; `None` before the first item.
    pub fn level(&self) -> Option<usize> {
        self.level
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(level) = self.level {
            self.recorder.close_level(level);
        }
    }
}

impl<I: Iterator> Iterator for LevelIter<'_, I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        if self.done {
            return None;
        }
        let level = match self.level {
            Some(level) => level,
            None => match self.recorder.open_level() {
                Some(level) => {
                    self.level = Some(level);
                    level
                }
                None => {
                    self.done = true;
                    return None;
                }
            },
        };

        match self.source.next() {
            Some(item) => {
                self.recorder.begin_row(level);
                Some(item)
            }
            None => {
                self.finish();
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            (0, Some(0))
        } else {
            self.source.size_hint()
        }
    }
}

impl<I> Drop for LevelIter<'_, I> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<I> fmt::Debug for LevelIter<'_, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelIter")
            .field("level", &self.level)
            .field("done", &self.done)
            .finish()
    }
}
