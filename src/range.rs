//! Numeric loop sources.

use crate::error::{LoopError, LoopResult};

/// Evenly spaced values in `[start, stop)`, numpy `arange` style.
///
/// The number of values is `ceil((stop - start) / step)`, or zero when the
/// interval is empty for the sign of `step`.
#[derive(Debug, Clone, PartialEq)]
pub struct Arange {
    start: f64,
    step: f64,
    len: usize,
    index: usize,
}

impl Arange {
    /// Creates a range from explicit bounds.
    pub fn new(start: f64, stop: f64, step: f64) -> LoopResult<Self> {
        if !(start.is_finite() && stop.is_finite() && step.is_finite()) {
            return Err(LoopError::Argument(format!(
                "range bounds must be finite (start={start}, stop={stop}, step={step})"
            )));
        }
        if step == 0.0 {
            return Err(LoopError::Argument("range step must not be zero".to_string()));
        }
        let span = ((stop - start) / step).ceil();
        let len = if span > 0.0 { span as usize } else { 0 };
        Ok(Self {
            start,
            step,
            len,
            index: 0,
        })
    }

    /// Interprets positional arguments the way a loop call does:
    /// `[stop]`, `[start, stop]` or `[start, stop, step]`.
    pub fn from_args(args: &[f64]) -> LoopResult<Self> {
        match *args {
            [] => Err(LoopError::Argument(
                "a loop needs an iterable, a count or a start/stop/step range".to_string(),
            )),
            [stop] => Self::new(0.0, stop, 1.0),
            [start, stop] => Self::new(start, stop, 1.0),
            [start, stop, step] => Self::new(start, stop, step),
            _ => Err(LoopError::Argument(format!(
                "a range takes at most 3 arguments, got {}",
                args.len()
            ))),
        }
    }
}

impl Iterator for Arange {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.index >= self.len {
            return None;
        }
        let value = self.start + self.step * self.index as f64;
        self.index += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Arange {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_argument_counts_from_zero() {
        let values: Vec<f64> = Arange::from_args(&[4.0]).unwrap().collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn fractional_step_matches_arange() {
        let range = Arange::from_args(&[1.0, 10.0, 0.5]).unwrap();
        assert_eq!(range.len(), 18);
        let values: Vec<f64> = range.collect();
        assert_eq!(values[0], 1.0);
        assert_eq!(values[17], 9.5);
    }

    #[test]
    fn uneven_span_rounds_up() {
        assert_eq!(Arange::new(0.0, 10.0, 3.0).unwrap().len(), 4);
    }

    #[test]
    fn negative_step_counts_down() {
        let values: Vec<f64> = Arange::new(3.0, 0.0, -1.0).unwrap().collect();
        assert_eq!(values, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn empty_interval_yields_nothing() {
        assert_eq!(Arange::new(5.0, 1.0, 1.0).unwrap().count(), 0);
    }

    #[test]
    fn rejects_unusable_arguments() {
        assert!(Arange::from_args(&[]).is_err());
        assert!(Arange::from_args(&[0.0, 1.0, 0.0]).is_err());
        assert!(Arange::from_args(&[0.0, 1.0, 1.0, 1.0]).is_err());
        assert!(Arange::from_args(&[f64::NAN]).is_err());
    }
}
