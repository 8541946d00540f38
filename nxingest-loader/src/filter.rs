//! Time-of-flight and wall-clock event filters.

use nxingest_core::PulseTime;
use serde::{Deserialize, Serialize};

/// Inclusive time-of-flight window in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TofWindow {
    pub min: f64,
    pub max: f64,
}

impl TofWindow {
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, tof: f64) -> bool {
        self.min <= tof && tof <= self.max
    }

    /// True when `min <= max` and both are finite.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// Inclusive pulse-time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: PulseTime,
    pub stop: PulseTime,
}

impl TimeWindow {
    #[must_use]
    pub fn new(start: PulseTime, stop: PulseTime) -> Self {
        Self { start, stop }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, time: PulseTime) -> bool {
        self.start <= time && time <= self.stop
    }
}

/// Filters applied by every ingestion worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub tof: Option<TofWindow>,
    pub time: Option<TimeWindow>,
}

impl EventFilter {
    #[must_use]
    pub fn new(tof: Option<TofWindow>, time: Option<TimeWindow>) -> Self {
        Self { tof, time }
    }

    #[inline]
    #[must_use]
    pub fn accepts_tof(&self, tof: f64) -> bool {
        self.tof.is_none_or(|w| w.contains(tof))
    }

    #[inline]
    #[must_use]
    pub fn accepts_time(&self, time: PulseTime) -> bool {
        self.time.is_none_or(|w| w.contains(time))
    }

    /// True if any window is set.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.tof.is_some() || self.time.is_some()
    }
}
