//! Experiment metadata shared by every period of a run.
//!
//! Periods do not copy the metadata. All members point at one
//! [`ExperimentMetadata`] behind an `Arc` and keep only their differences in
//! a [`PeriodOverrides`] record; [`MetadataView`] layers the two.

use crate::event::PulseTime;
use crate::mapping::DetectorId;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cartesian position in metres.
pub type Position = [f64; 3];

/// Name of the per-member log holding the 1-based period number.
pub const CURRENT_PERIOD_LOG: &str = "current_period";

/// Name of the boolean log that is true while `period` is active.
#[must_use]
pub fn period_log_name(period: u32) -> String {
    format!("period {period}")
}

/// Values recorded against time.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeSeries<T> {
    entries: Vec<(PulseTime, T)>,
}

impl<T> Default for TimeSeries<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> TimeSeries<T> {
    /// Creates an empty series.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample. Samples are expected in time order.
    pub fn push(&mut self, time: PulseTime, value: T) {
        self.entries.push((time, value));
    }

    /// All samples.
    #[must_use]
    pub fn entries(&self) -> &[(PulseTime, T)] {
        &self.entries
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the series holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value in effect at `time` (the latest sample at or before it).
    #[must_use]
    pub fn value_at(&self, time: PulseTime) -> Option<&T> {
        let n = self.entries.partition_point(|(t, _)| *t <= time);
        n.checked_sub(1).map(|i| &self.entries[i].1)
    }
}

/// A logged run property.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum LogValue {
    Number(f64),
    Integer(i64),
    Text(String),
    BoolSeries(TimeSeries<bool>),
    NumberSeries(TimeSeries<f64>),
}

impl LogValue {
    /// The scalar integer, if this is one.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

/// Detector ids belonging to one named bank.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BankGeometry {
    pub name: String,
    pub detector_ids: Vec<DetectorId>,
}

/// The parts of instrument geometry the ingestion pipeline needs.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instrument {
    pub name: String,
    pub source_position: Position,
    pub sample_position: Position,
    pub detector_positions: BTreeMap<DetectorId, Position>,
    pub banks: Vec<BankGeometry>,
    pub monitors: Vec<DetectorId>,
}

impl Instrument {
    /// Creates an instrument with no banks, source and sample at the origin.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a bank.
    #[must_use]
    pub fn with_bank(mut self, name: impl Into<String>, detector_ids: Vec<DetectorId>) -> Self {
        self.banks.push(BankGeometry {
            name: name.into(),
            detector_ids,
        });
        self
    }

    /// Looks up a bank by name.
    #[must_use]
    pub fn bank(&self, name: &str) -> Option<&BankGeometry> {
        self.banks.iter().find(|b| b.name == name)
    }

    /// All detector ids across banks, in bank order.
    pub fn detector_ids(&self) -> impl Iterator<Item = DetectorId> + '_ {
        self.banks.iter().flat_map(|b| b.detector_ids.iter().copied())
    }

    /// Source-to-sample distance.
    #[must_use]
    pub fn l1(&self) -> f64 {
        self.source_position
            .iter()
            .zip(self.sample_position)
            .map(|(s, p)| (p - s).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// Sample geometry attached to a run.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SampleShape {
    Cylinder { radius: f64, height: f64 },
    Sphere { radius: f64 },
    Cuboid { width: f64, height: f64, depth: f64 },
}

/// Run-level metadata shared by all periods.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExperimentMetadata {
    pub title: String,
    pub instrument: Arc<Instrument>,
    pub logs: BTreeMap<String, LogValue>,
    pub sample_shape: Option<SampleShape>,
}

impl ExperimentMetadata {
    #[must_use]
    pub fn new(title: impl Into<String>, instrument: Arc<Instrument>) -> Self {
        Self {
            title: title.into(),
            instrument,
            ..Self::default()
        }
    }

    /// Adds a logged property.
    #[must_use]
    pub fn with_log(mut self, name: impl Into<String>, value: LogValue) -> Self {
        self.logs.insert(name.into(), value);
        self
    }
}

/// What one period changes relative to the shared metadata.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeriodOverrides {
    /// 1-based period number, exposed as the `current_period` log.
    pub current_period: Option<u32>,
    /// "period N" log, true while this period is active.
    pub period_indicator: Option<TimeSeries<bool>>,
    pub title: Option<String>,
}

impl PeriodOverrides {
    /// True when nothing is overridden.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current_period.is_none() && self.period_indicator.is_none() && self.title.is_none()
    }
}

/// Shared metadata with one period's overrides applied.
#[derive(Debug, Clone, Copy)]
pub struct MetadataView<'a> {
    base: &'a ExperimentMetadata,
    overrides: &'a PeriodOverrides,
}

impl<'a> MetadataView<'a> {
    #[must_use]
    pub fn new(base: &'a ExperimentMetadata, overrides: &'a PeriodOverrides) -> Self {
        Self { base, overrides }
    }

    #[must_use]
    pub fn title(&self) -> &'a str {
        self.overrides.title.as_deref().unwrap_or(&self.base.title)
    }

    #[must_use]
    pub fn instrument(&self) -> &'a Arc<Instrument> {
        &self.base.instrument
    }

    #[must_use]
    pub fn sample_shape(&self) -> Option<SampleShape> {
        self.base.sample_shape
    }

    /// The `current_period` override, if attached.
    #[must_use]
    pub fn current_period(&self) -> Option<u32> {
        self.overrides.current_period
    }

    /// Looks up a log, preferring per-period values over shared ones.
    #[must_use]
    pub fn log(&self, name: &str) -> Option<Cow<'a, LogValue>> {
        if let Some(period) = self.overrides.current_period {
            if name == CURRENT_PERIOD_LOG {
                return Some(Cow::Owned(LogValue::Integer(i64::from(period))));
            }
            if let Some(series) = &self.overrides.period_indicator {
                if name == period_log_name(period) {
                    return Some(Cow::Owned(LogValue::BoolSeries(series.clone())));
                }
            }
        }
        self.base.logs.get(name).map(Cow::Borrowed)
    }

    /// Names of every visible log, sorted.
    #[must_use]
    pub fn log_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.base.logs.keys().cloned().collect();
        if let Some(period) = self.overrides.current_period {
            names.push(CURRENT_PERIOD_LOG.to_string());
            if self.overrides.period_indicator.is_some() {
                names.push(period_log_name(period));
            }
        }
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_time_series_value_at() {
        let mut series = TimeSeries::new();
        series.push(PulseTime(10), 1.5);
        series.push(PulseTime(20), 2.5);
        assert_eq!(series.value_at(PulseTime(5)), None);
        assert_eq!(series.value_at(PulseTime(10)), Some(&1.5));
        assert_eq!(series.value_at(PulseTime(99)), Some(&2.5));
    }

    #[test]
    fn test_instrument_banks() {
        let mut inst = Instrument::new("SNAP")
            .with_bank("bank1", vec![100, 101])
            .with_bank("bank2", vec![200]);
        inst.source_position = [0.0, 0.0, -15.0];
        assert_eq!(inst.bank("bank2").unwrap().detector_ids, vec![200]);
        assert!(inst.bank("bank3").is_none());
        assert_eq!(inst.detector_ids().collect::<Vec<_>>(), vec![100, 101, 200]);
        assert_relative_eq!(inst.l1(), 15.0);
    }

    #[test]
    fn test_view_layers_overrides() {
        let base = ExperimentMetadata::new("run 42", Arc::new(Instrument::new("X")))
            .with_log("temperature", LogValue::Number(300.0))
            .with_log(CURRENT_PERIOD_LOG, LogValue::Integer(99));
        let mut indicator = TimeSeries::new();
        indicator.push(PulseTime(0), true);
        let overrides = PeriodOverrides {
            current_period: Some(2),
            period_indicator: Some(indicator),
            title: None,
        };

        let view = MetadataView::new(&base, &overrides);
        assert_eq!(view.title(), "run 42");
        assert_eq!(
            view.log(CURRENT_PERIOD_LOG).unwrap().as_integer(),
            Some(2)
        );
        assert!(matches!(
            view.log("period 2").as_deref(),
            Some(LogValue::BoolSeries(_))
        ));
        assert!(view.log("period 1").is_none());
        assert_eq!(
            view.log("temperature").as_deref(),
            Some(&LogValue::Number(300.0))
        );
        assert_eq!(
            view.log_names(),
            vec!["current_period", "period 2", "temperature"]
        );

        let plain = PeriodOverrides::default();
        assert!(plain.is_empty());
        let view = MetadataView::new(&base, &plain);
        assert_eq!(view.log(CURRENT_PERIOD_LOG).unwrap().as_integer(), Some(99));
    }
}
