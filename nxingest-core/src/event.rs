//! Event types for neutron event data.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Time-of-flight above which an event is considered implausible (µs).
pub const MAX_PLAUSIBLE_TOF_US: f64 = 2.0e8;

/// Absolute pulse time in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PulseTime(pub i64);

impl PulseTime {
    /// Creates a pulse time from nanoseconds since the epoch.
    #[inline]
    #[must_use]
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Creates a pulse time from (possibly fractional) seconds since the epoch.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_seconds(seconds: f64) -> Self {
        Self((seconds * 1.0e9).round() as i64)
    }

    /// Returns the raw nanosecond value.
    #[inline]
    #[must_use]
    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Returns this time shifted by `nanos`.
    #[inline]
    #[must_use]
    pub fn offset_by(&self, nanos: i64) -> Self {
        Self(self.0.saturating_add(nanos))
    }
}

/// A single neutron detection.
///
/// Events are moved into exactly one [`EventList`](crate::EventList) and never shared.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    /// Time-of-flight in microseconds.
    pub tof: f64,
    /// Absolute time of the source pulse that produced the event.
    pub pulse_time: PulseTime,
    /// Statistical weight (1.0 for raw counts).
    pub weight: f32,
}

impl Event {
    /// Creates an unweighted event.
    #[inline]
    #[must_use]
    pub fn new(tof: f64, pulse_time: PulseTime) -> Self {
        Self {
            tof,
            pulse_time,
            weight: 1.0,
        }
    }

    /// Creates a weighted event.
    #[inline]
    #[must_use]
    pub fn weighted(tof: f64, pulse_time: PulseTime, weight: f32) -> Self {
        Self {
            tof,
            pulse_time,
            weight,
        }
    }

    /// True when the time-of-flight is negative, NaN, or beyond
    /// [`MAX_PLAUSIBLE_TOF_US`].
    #[inline]
    #[must_use]
    pub fn has_suspicious_tof(&self) -> bool {
        !(0.0..=MAX_PLAUSIBLE_TOF_US).contains(&self.tof)
    }
}
