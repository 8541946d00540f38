//! Pulse time lookup table.

use crate::event::PulseTime;
use crate::{Error, Result};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Immutable, time-sorted table of source pulse timestamps.
///
/// Raw event records carry a pulse index; this table resolves it to an
/// absolute [`PulseTime`]. Cloning is cheap (the table is shared).
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PulseTimeIndex {
    times: Arc<[PulseTime]>,
}

impl PulseTimeIndex {
    /// Wraps an already sorted table.
    ///
    /// # Errors
    /// Returns [`Error::UnsortedPulseTimes`] if any time precedes its predecessor.
    pub fn new(times: Vec<PulseTime>) -> Result<Self> {
        if let Some(i) = times.windows(2).position(|w| w[1] < w[0]) {
            return Err(Error::UnsortedPulseTimes(i + 1));
        }
        Ok(Self {
            times: times.into(),
        })
    }

    /// Sorts the table first. Use when the source does not guarantee ordering.
    #[must_use]
    pub fn from_unsorted(mut times: Vec<PulseTime>) -> Self {
        times.sort_unstable();
        Self {
            times: times.into(),
        }
    }

    /// Number of pulses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// True if the table holds no pulses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Pulse time of pulse `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: u32) -> Option<PulseTime> {
        self.times.get(index as usize).copied()
    }

    /// Earliest and latest pulse.
    #[must_use]
    pub fn bounds(&self) -> Option<(PulseTime, PulseTime)> {
        Some((*self.times.first()?, *self.times.last()?))
    }

    /// Index of the last pulse at or before `time`.
    #[must_use]
    pub fn pulse_at_or_before(&self, time: PulseTime) -> Option<usize> {
        self.times.partition_point(|&t| t <= time).checked_sub(1)
    }

    /// The pulse times.
    #[must_use]
    pub fn as_slice(&self) -> &[PulseTime] {
        &self.times
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(ns: &[i64]) -> PulseTimeIndex {
        PulseTimeIndex::new(ns.iter().copied().map(PulseTime).collect()).unwrap()
    }

    #[test]
    fn test_lookup() {
        let idx = index(&[100, 200, 300]);
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.get(1), Some(PulseTime(200)));
        assert_eq!(idx.get(3), None);
        assert_eq!(idx.bounds(), Some((PulseTime(100), PulseTime(300))));
    }

    #[test]
    fn test_unsorted_rejected() {
        let err = PulseTimeIndex::new(vec![PulseTime(2), PulseTime(1)]).unwrap_err();
        assert!(matches!(err, Error::UnsortedPulseTimes(1)));
        let idx = PulseTimeIndex::from_unsorted(vec![PulseTime(2), PulseTime(1)]);
        assert_eq!(idx.as_slice(), &[PulseTime(1), PulseTime(2)]);
    }

    #[test]
    fn test_pulse_at_or_before() {
        let idx = index(&[100, 200, 300]);
        assert_eq!(idx.pulse_at_or_before(PulseTime(50)), None);
        assert_eq!(idx.pulse_at_or_before(PulseTime(100)), Some(0));
        assert_eq!(idx.pulse_at_or_before(PulseTime(250)), Some(1));
        assert_eq!(idx.pulse_at_or_before(PulseTime(1000)), Some(2));
        assert!(PulseTimeIndex::default().bounds().is_none());
    }
}
