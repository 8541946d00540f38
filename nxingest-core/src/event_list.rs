//! Per-channel event storage and its histogram counterpart.
//!
//! An [`EventList`] is the growable store that ingestion workers append into,
//! one per channel. [`ChannelData`] is the tagged capability set handed to
//! downstream consumers: either the raw events or a [`Histogram`] produced by
//! an explicit conversion.

use crate::event::{Event, PulseTime};
use crate::{Error, Result};
use std::cmp::Ordering;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Ordering currently guaranteed by an [`EventList`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SortOrder {
    /// Insertion order; no guarantee.
    #[default]
    Unsorted,
    /// Ascending pulse time.
    PulseTime,
    /// Ascending time-of-flight.
    Tof,
    /// Ascending pulse time, then time-of-flight within a pulse.
    PulseTimeTof,
}

/// Growable sequence of events for one channel.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventList {
    events: Vec<Event>,
    order: SortOrder,
}

impl EventList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty list with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            order: SortOrder::Unsorted,
        }
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if there are no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Current capacity of the underlying buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.events.capacity()
    }

    /// Reserves room for `additional` more events.
    pub fn reserve(&mut self, additional: usize) {
        self.events.reserve(additional);
    }

    /// Appends one event. Invalidates any sort guarantee.
    #[inline]
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
        self.order = SortOrder::Unsorted;
    }

    /// Moves all events out of `other` into this list.
    pub fn append(&mut self, other: &mut Vec<Event>) {
        if other.is_empty() {
            return;
        }
        self.events.append(other);
        self.order = SortOrder::Unsorted;
    }

    /// Removes all events, keeping the allocation.
    pub fn clear(&mut self) {
        self.events.clear();
        self.order = SortOrder::Unsorted;
    }

    /// Read-only view of the events.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The ordering currently guaranteed.
    #[must_use]
    pub fn order(&self) -> SortOrder {
        self.order
    }

    /// Times-of-flight in storage order.
    #[must_use]
    pub fn tofs(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.tof).collect()
    }

    /// Pulse times in storage order.
    #[must_use]
    pub fn pulse_times(&self) -> Vec<PulseTime> {
        self.events.iter().map(|e| e.pulse_time).collect()
    }

    /// Mutable access to every time-of-flight, for in-place corrections.
    ///
    /// A TOF-sorted list loses its guarantee since the closure may reorder values.
    pub fn map_tofs(&mut self, mut f: impl FnMut(f64) -> f64) {
        for event in &mut self.events {
            event.tof = f(event.tof);
        }
        if matches!(self.order, SortOrder::Tof | SortOrder::PulseTimeTof) {
            self.order = SortOrder::Unsorted;
        }
    }

    /// Sum of event weights.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.events.iter().map(|e| f64::from(e.weight)).sum()
    }

    /// Smallest and largest time-of-flight, if any events are present.
    #[must_use]
    pub fn tof_range(&self) -> Option<(f64, f64)> {
        self.events.iter().fold(None, |acc, e| match acc {
            None => Some((e.tof, e.tof)),
            Some((lo, hi)) => Some((lo.min(e.tof), hi.max(e.tof))),
        })
    }

    /// Sorts the events. Sorting is stable, so equal keys keep insertion order.
    pub fn sort(&mut self, order: SortOrder) {
        if order == self.order || order == SortOrder::Unsorted {
            return;
        }
        match order {
            SortOrder::Unsorted => {}
            SortOrder::PulseTime => self.events.sort_by_key(|e| e.pulse_time),
            SortOrder::Tof => self.events.sort_by(|a, b| a.tof.total_cmp(&b.tof)),
            SortOrder::PulseTimeTof => self.events.sort_by(|a, b| {
                a.pulse_time
                    .cmp(&b.pulse_time)
                    .then(a.tof.total_cmp(&b.tof))
            }),
        }
        self.order = order;
    }

    /// Bins the events into a histogram over `edges`.
    ///
    /// Events outside the edge range are not counted.
    #[must_use]
    pub fn histogram(&self, edges: &BinEdges) -> Histogram {
        let n_bins = edges.n_bins();
        let mut counts = vec![0.0; n_bins];
        let mut sum_sq = vec![0.0; n_bins];
        for event in &self.events {
            if let Some(bin) = edges.bin_of(event.tof) {
                let w = f64::from(event.weight);
                counts[bin] += w;
                sum_sq[bin] += w * w;
            }
        }
        Histogram {
            edges: edges.clone(),
            counts,
            errors: sum_sq.into_iter().map(f64::sqrt).collect(),
        }
    }
}

impl FromIterator<Event> for EventList {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
            order: SortOrder::Unsorted,
        }
    }
}

/// Strictly increasing histogram bin boundaries, shared between channels.
#[derive(Debug, Clone, PartialEq)]
pub struct BinEdges(Arc<[f64]>);

impl BinEdges {
    /// Validates and wraps bin boundaries.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBinEdges`] if fewer than two edges are given or
    /// the edges are not strictly increasing.
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::InvalidBinEdges(format!(
                "need at least 2 edges, got {}",
                edges.len()
            )));
        }
        let not_increasing = |w: &[f64]| w[0].partial_cmp(&w[1]) != Some(Ordering::Less);
        if let Some(i) = edges.windows(2).position(not_increasing) {
            return Err(Error::InvalidBinEdges(format!(
                "edges not strictly increasing at index {}",
                i + 1
            )));
        }
        Ok(Self(edges.into()))
    }

    /// The boundaries.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Number of bins (one less than the number of edges).
    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.0.len() - 1
    }

    /// Index of the bin holding `x`. The last bin is closed on the right.
    #[must_use]
    pub fn bin_of(&self, x: f64) -> Option<usize> {
        let edges = &self.0;
        let last = edges[edges.len() - 1];
        if x.is_nan() || x < edges[0] || x > last {
            return None;
        }
        if x == last {
            return Some(self.n_bins() - 1);
        }
        Some(edges.partition_point(|&e| e <= x) - 1)
    }
}

#[cfg(feature = "serde")]
impl Serialize for BinEdges {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for BinEdges {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let edges = Vec::<f64>::deserialize(deserializer)?;
        BinEdges::new(edges).map_err(serde::de::Error::custom)
    }
}

/// Binned counts with Poisson-style errors.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Histogram {
    /// Bin boundaries.
    pub edges: BinEdges,
    /// Summed weights per bin.
    pub counts: Vec<f64>,
    /// Square root of summed squared weights per bin.
    pub errors: Vec<f64>,
}

/// Channel contents in one of the two supported representations.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChannelData {
    /// Raw events.
    Events(EventList),
    /// Binned counts.
    Histogram(Histogram),
}

impl ChannelData {
    /// The events, if this channel still holds them.
    #[must_use]
    pub fn as_events(&self) -> Option<&EventList> {
        match self {
            Self::Events(list) => Some(list),
            Self::Histogram(_) => None,
        }
    }

    /// The histogram, if this channel has been binned.
    #[must_use]
    pub fn as_histogram(&self) -> Option<&Histogram> {
        match self {
            Self::Histogram(h) => Some(h),
            Self::Events(_) => None,
        }
    }

    /// Converts to a histogram over `edges`. Already-binned data is returned unchanged.
    #[must_use]
    pub fn into_histogram(self, edges: &BinEdges) -> Self {
        match self {
            Self::Events(list) => Self::Histogram(list.histogram(edges)),
            binned @ Self::Histogram(_) => binned,
        }
    }
}
