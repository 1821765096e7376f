//! Sliding-window sample extraction for range evaluation.
//!
//! A range query evaluates one window per step, and consecutive windows
//! overlap heavily. `MatrixEnumerator` walks a series once with a forward-only
//! cursor and keeps the previous window in a caller-owned buffer, so the total
//! work for a series is O(samples + steps) instead of O(samples × steps).
//!
//! # Window precondition
//!
//! Windows must advance monotonically: a call must not move `max_ts`
//! backwards past samples that an earlier call already evicted or skipped.
//! The enumerator does not check this. Violating it silently loses samples.
//! Range evaluation always walks steps from `start` to `end`, which satisfies
//! the precondition.

use crate::core::{LanternError, Result};
use crate::metrics::types::Sample;
use std::collections::VecDeque;

/// Forward-only window cursor over one series' ascending samples.
///
/// One instance serves one series for one query and is not shared between
/// threads; parallel evaluation creates one enumerator per series.
#[derive(Debug)]
pub struct MatrixEnumerator<'a> {
    samples: &'a [Sample],
    cursor: usize,
}

impl<'a> MatrixEnumerator<'a> {
    /// `samples` must be sorted ascending by timestamp.
    pub fn new(samples: &'a [Sample]) -> Self {
        Self { samples, cursor: 0 }
    }

    /// Fills `buffer` with the samples in `[min_ts, max_ts]`, ascending.
    ///
    /// The buffer must be the one returned by the previous call (or empty on
    /// the first call). Entries that fell out of the window are removed from
    /// the front; new entries are appended.
    pub fn enumerate<'b>(
        &mut self,
        min_ts: i64,
        max_ts: i64,
        buffer: Option<&'b mut VecDeque<Sample>>,
    ) -> Result<&'b mut VecDeque<Sample>> {
        if min_ts > max_ts {
            return Err(LanternError::InvalidWindow { min_ts, max_ts });
        }
        let buffer = buffer.ok_or(LanternError::NullArgument("buffer"))?;

        let expired = buffer.iter().take_while(|s| s.timestamp_unix_sec < min_ts).count();
        if expired == buffer.len() {
            buffer.clear();
        } else {
            buffer.drain(..expired);
        }

        while let Some(sample) = self.samples.get(self.cursor) {
            if sample.timestamp_unix_sec > max_ts {
                // Left in place for a later, wider window.
                break;
            }
            if sample.timestamp_unix_sec >= min_ts {
                buffer.push_back(*sample);
            }
            self.cursor += 1;
        }

        Ok(buffer)
    }

    /// True once every sample has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Sample> {
        (0..5).map(|i| Sample::new(i * 10, i as f64)).collect()
    }

    fn timestamps(buffer: &VecDeque<Sample>) -> Vec<i64> {
        buffer.iter().map(|s| s.timestamp_unix_sec).collect()
    }

    #[test]
    fn test_overlapping_windows_reuse_buffer() {
        let samples = samples();
        let mut enumerator = MatrixEnumerator::new(&samples);
        let mut buffer = VecDeque::new();

        let out = enumerator.enumerate(0, 20, Some(&mut buffer)).unwrap();
        assert_eq!(timestamps(out), vec![0, 10, 20]);

        let out = enumerator.enumerate(10, 30, Some(&mut buffer)).unwrap();
        assert_eq!(timestamps(out), vec![10, 20, 30]);
    }

    #[test]
    fn test_disjoint_window_replaces_buffer() {
        let samples = samples();
        let mut enumerator = MatrixEnumerator::new(&samples);
        let mut buffer = VecDeque::new();

        enumerator.enumerate(0, 10, Some(&mut buffer)).unwrap();
        assert_eq!(timestamps(&buffer), vec![0, 10]);

        let out = enumerator.enumerate(30, 40, Some(&mut buffer)).unwrap();
        assert_eq!(timestamps(out), vec![30, 40]);
        assert!(enumerator.is_exhausted());
    }

    #[test]
    fn test_stalled_window_keeps_next_sample() {
        let samples = samples();
        let mut enumerator = MatrixEnumerator::new(&samples);
        let mut buffer = VecDeque::new();

        enumerator.enumerate(0, 15, Some(&mut buffer)).unwrap();
        assert_eq!(timestamps(&buffer), vec![0, 10]);

        enumerator.enumerate(0, 15, Some(&mut buffer)).unwrap();
        assert_eq!(timestamps(&buffer), vec![0, 10]);

        let out = enumerator.enumerate(5, 25, Some(&mut buffer)).unwrap();
        assert_eq!(timestamps(out), vec![10, 20]);
    }

    #[test]
    fn test_invalid_window() {
        let samples = samples();
        let mut enumerator = MatrixEnumerator::new(&samples);
        let mut buffer = VecDeque::new();
        let err = enumerator.enumerate(20, 10, Some(&mut buffer)).unwrap_err();
        assert!(matches!(err, LanternError::InvalidWindow { min_ts: 20, max_ts: 10 }));
    }

    #[test]
    fn test_missing_buffer() {
        let samples = samples();
        let mut enumerator = MatrixEnumerator::new(&samples);
        let err = enumerator.enumerate(0, 10, None).unwrap_err();
        assert!(matches!(err, LanternError::NullArgument(_)));
    }

    #[test]
    fn test_exhausted_cursor_is_not_an_error() {
        let samples = samples();
        let mut enumerator = MatrixEnumerator::new(&samples);
        let mut buffer = VecDeque::new();

        enumerator.enumerate(0, 100, Some(&mut buffer)).unwrap();
        assert!(enumerator.is_exhausted());
        let out = enumerator.enumerate(35, 200, Some(&mut buffer)).unwrap();
        assert_eq!(timestamps(out), vec![40]);
        let out = enumerator.enumerate(300, 400, Some(&mut buffer)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_empty_series() {
        let mut enumerator = MatrixEnumerator::new(&[]);
        let mut buffer = VecDeque::new();
        assert!(enumerator.enumerate(0, 10, Some(&mut buffer)).unwrap().is_empty());
    }
}
