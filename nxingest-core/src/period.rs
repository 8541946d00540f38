//! Period log validation and per-event period selection.
//!
//! Multi-period runs record which measurement period was active as a time
//! series of period numbers. Before that log is trusted for routing events,
//! [`split_by_period`] checks it against the period count the file declares:
//!
//! - a historical single-period log containing only `0` is normalized to `1`;
//! - fewer periods than declared is reported but recoverable;
//! - more periods than declared means the file is corrupt and the load must stop.

use crate::event::PulseTime;
use crate::metadata::TimeSeries;
use std::collections::BTreeSet;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Ways a period log can disagree with the declared period count.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodCorrupted {
    /// The log never reaches the declared count. Recoverable.
    #[error(
        "fewer periods observed than declared: period log reaches {observed}, file declares {declared}"
    )]
    TooFewPeriods { declared: usize, observed: usize },

    /// The log names a period beyond the declared count.
    #[error(
        "period log contains period {found} but the file declares {declared} period(s); the file is corrupt"
    )]
    TooManyPeriods { declared: usize, found: usize },

    /// Period 0 in a log that is not the single-period legacy format.
    #[error("period log contains period 0 but the file declares {declared} period(s)")]
    ZeroPeriod { declared: usize },

    /// A declared count of zero.
    #[error("declared period count must be at least 1")]
    NoPeriodsDeclared,
}

impl PeriodCorrupted {
    /// True when the load must abort.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::TooFewPeriods { .. })
    }
}

/// Raw `(time, period number)` pairs, ordered by time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeriodLog {
    entries: Vec<(PulseTime, u32)>,
}

impl PeriodLog {
    /// Builds a log, stably sorting the pairs by time.
    #[must_use]
    pub fn new(mut entries: Vec<(PulseTime, u32)>) -> Self {
        entries.sort_by_key(|&(t, _)| t);
        Self { entries }
    }

    /// The pairs in time order.
    #[must_use]
    pub fn entries(&self) -> &[(PulseTime, u32)] {
        &self.entries
    }

    /// True if the log has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct period numbers seen.
    #[must_use]
    pub fn distinct_periods(&self) -> BTreeSet<u32> {
        self.entries.iter().map(|&(_, p)| p).collect()
    }
}

/// A period log proven consistent with its period count.
///
/// Deserializing re-checks that every period number lies in `1..=n_periods`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "NormalizedParts"))]
pub struct NormalizedPeriodLog {
    entries: Vec<(PulseTime, u32)>,
    n_periods: usize,
    distinct: usize,
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct NormalizedParts {
    entries: Vec<(PulseTime, u32)>,
    n_periods: usize,
    distinct: usize,
}

#[cfg(feature = "serde")]
impl TryFrom<NormalizedParts> for NormalizedPeriodLog {
    type Error = PeriodCorrupted;

    fn try_from(parts: NormalizedParts) -> Result<Self, PeriodCorrupted> {
        let declared = parts.n_periods;
        if declared == 0 {
            return Err(PeriodCorrupted::NoPeriodsDeclared);
        }
        for &(_, period) in &parts.entries {
            if period == 0 {
                return Err(PeriodCorrupted::ZeroPeriod { declared });
            }
            if period as usize > declared {
                return Err(PeriodCorrupted::TooManyPeriods {
                    declared,
                    found: period as usize,
                });
            }
        }
        let mut entries = parts.entries;
        entries.sort_by_key(|&(t, _)| t);
        Ok(Self {
            entries,
            n_periods: declared,
            distinct: parts.distinct,
        })
    }
}

impl NormalizedPeriodLog {
    /// A run without period information: everything is period 1.
    #[must_use]
    pub fn single() -> Self {
        Self {
            entries: Vec::new(),
            n_periods: 1,
            distinct: 0,
        }
    }

    /// Number of periods events are split into.
    #[must_use]
    pub fn n_periods(&self) -> usize {
        self.n_periods
    }

    /// Number of distinct period numbers in the log.
    #[must_use]
    pub fn distinct_count(&self) -> usize {
        self.distinct
    }

    /// The normalized pairs in time order.
    #[must_use]
    pub fn entries(&self) -> &[(PulseTime, u32)] {
        &self.entries
    }

    /// 1-based period active at `time`.
    ///
    /// Times before the first entry belong to the first entry's period; an
    /// empty log means period 1.
    #[inline]
    #[must_use]
    pub fn period_at(&self, time: PulseTime) -> u32 {
        match self.entries.partition_point(|&(t, _)| t <= time) {
            0 => self.entries.first().map_or(1, |&(_, p)| p),
            n => self.entries[n - 1].1,
        }
    }

    /// 0-based member index for `time`.
    #[inline]
    #[must_use]
    pub fn period_index_at(&self, time: PulseTime) -> usize {
        (self.period_at(time) as usize).saturating_sub(1)
    }

    /// Boolean series that is true while `period` is active.
    #[must_use]
    pub fn indicator_series(&self, period: u32) -> TimeSeries<bool> {
        let mut series = TimeSeries::new();
        let mut last: Option<bool> = None;
        for &(time, p) in &self.entries {
            let active = p == period;
            if last != Some(active) {
                series.push(time, active);
                last = Some(active);
            }
        }
        series
    }
}

/// Validates `log` against `declared` periods.
///
/// # Errors
/// See [`PeriodCorrupted`]; only [`PeriodCorrupted::TooFewPeriods`] is recoverable.
pub fn split_by_period(
    log: PeriodLog,
    declared: usize,
) -> Result<NormalizedPeriodLog, PeriodCorrupted> {
    if declared == 0 {
        return Err(PeriodCorrupted::NoPeriodsDeclared);
    }
    let distinct = log.distinct_periods();

    if declared == 1 && distinct.iter().eq([0u32].iter()) {
        let entries = log.entries.into_iter().map(|(t, _)| (t, 1)).collect();
        return Ok(NormalizedPeriodLog {
            entries,
            n_periods: 1,
            distinct: 1,
        });
    }
    if distinct.contains(&0) {
        return Err(PeriodCorrupted::ZeroPeriod { declared });
    }

    let max = distinct.last().map_or(1, |&p| p as usize);
    if max > declared {
        return Err(PeriodCorrupted::TooManyPeriods {
            declared,
            found: max,
        });
    }
    if max < declared {
        return Err(PeriodCorrupted::TooFewPeriods {
            declared,
            observed: max,
        });
    }

    Ok(NormalizedPeriodLog {
        entries: log.entries,
        n_periods: declared,
        distinct: distinct.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(pairs: &[(i64, u32)]) -> PeriodLog {
        PeriodLog::new(pairs.iter().map(|&(t, p)| (PulseTime(t), p)).collect())
    }

    #[test]
    fn test_three_periods_accepted() {
        let norm = split_by_period(log(&[(0, 1), (10, 2), (20, 3), (30, 1)]), 3).unwrap();
        assert_eq!(norm.n_periods(), 3);
        assert_eq!(norm.distinct_count(), 3);
        assert_eq!(norm.period_at(PulseTime(-5)), 1);
        assert_eq!(norm.period_at(PulseTime(10)), 2);
        assert_eq!(norm.period_at(PulseTime(25)), 3);
        assert_eq!(norm.period_index_at(PulseTime(35)), 0);
    }

    #[test]
    fn test_legacy_zero_normalized() {
        let norm = split_by_period(log(&[(0, 0), (10, 0)]), 1).unwrap();
        assert_eq!(norm.n_periods(), 1);
        assert!(norm.entries().iter().all(|&(_, p)| p == 1));
        assert_eq!(norm.period_at(PulseTime(5)), 1);
    }

    #[test]
    fn test_too_many_is_fatal() {
        let err = split_by_period(log(&[(0, 1), (1, 2), (2, 3)]), 2).unwrap_err();
        assert_eq!(
            err,
            PeriodCorrupted::TooManyPeriods {
                declared: 2,
                found: 3
            }
        );
        assert!(err.is_fatal());
        assert!(err.to_string().contains("declares 2"));
    }

    #[test]
    fn test_too_few_is_recoverable() {
        let err = split_by_period(log(&[(0, 1), (1, 2)]), 4).unwrap_err();
        assert_eq!(
            err,
            PeriodCorrupted::TooFewPeriods {
                declared: 4,
                observed: 2
            }
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_zero_in_multi_period_log() {
        let err = split_by_period(log(&[(0, 0), (1, 2)]), 2).unwrap_err();
        assert!(matches!(err, PeriodCorrupted::ZeroPeriod { declared: 2 }));
        assert!(split_by_period(PeriodLog::default(), 0).is_err());
    }

    #[test]
    fn test_empty_log_single_period() {
        let norm = split_by_period(PeriodLog::default(), 1).unwrap();
        assert_eq!(norm.n_periods(), 1);
        assert_eq!(norm.period_at(PulseTime(123)), 1);
        assert_eq!(norm, NormalizedPeriodLog::single());
    }

    #[test]
    fn test_period_index_never_underflows() {
        let norm = NormalizedPeriodLog {
            entries: vec![(PulseTime(0), 0)],
            n_periods: 1,
            distinct: 1,
        };
        assert_eq!(norm.period_index_at(PulseTime(5)), 0);
    }

    #[test]
    fn test_indicator_series() {
        let norm = split_by_period(log(&[(0, 1), (10, 2), (20, 2), (30, 1)]), 2).unwrap();
        let series = norm.indicator_series(2);
        assert_eq!(
            series.entries(),
            &[
                (PulseTime(0), false),
                (PulseTime(10), true),
                (PulseTime(30), false)
            ]
        );
    }
}
