//! Destinations that ingestion workers append into.
//!
//! - [`SliceSink`]: disjoint `&mut` sub-slices of the collection's stores.
//! - [`LockedSink`]: one mutex per channel, for banks whose channels may overlap.
//! - [`PartialIngest`]: process-local buffers merged at the join barrier.

use crate::{Error, Result};
use nxingest_core::{ChannelIndex, Event, EventList};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Mutex, PoisonError};

/// Where a worker puts the events it keeps.
pub trait EventSink {
    /// Channels this sink can hold.
    fn channel_range(&self) -> Range<ChannelIndex>;

    /// Appends `event` to `channel` of `period` (0-based).
    ///
    /// `channel` must lie in [`Self::channel_range`].
    fn push(&mut self, period: usize, channel: ChannelIndex, event: Event);

    #[inline]
    fn accepts(&self, channel: ChannelIndex) -> bool {
        self.channel_range().contains(&channel)
    }
}

/// Exclusive view of channels `base..base + len` in every period.
#[derive(Debug)]
pub struct SliceSink<'a> {
    base: ChannelIndex,
    len: usize,
    periods: Vec<&'a mut [EventList]>,
}

impl<'a> SliceSink<'a> {
    /// Every slice in `periods` must have the same length.
    #[must_use]
    pub fn new(base: ChannelIndex, periods: Vec<&'a mut [EventList]>) -> Self {
        let len = periods.first().map_or(0, |p| p.len());
        Self { base, len, periods }
    }
}

impl EventSink for SliceSink<'_> {
    fn channel_range(&self) -> Range<ChannelIndex> {
        self.base..self.base + self.len
    }

    #[inline]
    fn push(&mut self, period: usize, channel: ChannelIndex, event: Event) {
        self.periods[period][channel - self.base].push(event);
    }
}

/// Cuts each period's stores into one [`SliceSink`] per span.
///
/// `spans` must be sorted, non-overlapping and within the stores.
pub(crate) fn split_disjoint<'a>(
    targets: Vec<&'a mut [EventList]>,
    spans: &[Range<ChannelIndex>],
) -> Vec<SliceSink<'a>> {
    let mut per_span: Vec<Vec<&'a mut [EventList]>> = spans.iter().map(|_| Vec::new()).collect();
    for stores in targets {
        let mut rest = stores;
        let mut consumed = 0;
        for (span, slices) in spans.iter().zip(per_span.iter_mut()) {
            let tail = std::mem::take(&mut rest);
            let (_, tail) = tail.split_at_mut(span.start - consumed);
            let (mine, tail) = tail.split_at_mut(span.len());
            slices.push(mine);
            rest = tail;
            consumed = span.end;
        }
    }
    spans
        .iter()
        .zip(per_span)
        .map(|(span, slices)| SliceSink::new(span.start, slices))
        .collect()
}

/// Channel stores behind one mutex each, shared by all workers.
#[derive(Debug)]
pub struct LockedStores {
    periods: Vec<Vec<Mutex<EventList>>>,
    n_channels: usize,
}

impl LockedStores {
    /// Moves the lists out of `targets`; [`Self::restore`] puts them back.
    pub fn take(targets: &mut [&mut [EventList]]) -> Self {
        let n_channels = targets.first().map_or(0, |t| t.len());
        let periods = targets
            .iter_mut()
            .map(|stores| {
                stores
                    .iter_mut()
                    .map(|list| Mutex::new(std::mem::take(list)))
                    .collect()
            })
            .collect();
        Self {
            periods,
            n_channels,
        }
    }

    /// A handle for one worker.
    #[must_use]
    pub fn sink(&self) -> LockedSink<'_> {
        LockedSink { stores: self }
    }

    /// Moves the lists back into `targets`.
    pub fn restore(self, targets: &mut [&mut [EventList]]) {
        for (stores, locked) in targets.iter_mut().zip(self.periods) {
            for (slot, list) in stores.iter_mut().zip(locked) {
                *slot = list.into_inner().unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}

/// Worker handle onto [`LockedStores`].
#[derive(Debug, Clone, Copy)]
pub struct LockedSink<'a> {
    stores: &'a LockedStores,
}

impl EventSink for LockedSink<'_> {
    fn channel_range(&self) -> Range<ChannelIndex> {
        0..self.stores.n_channels
    }

    fn push(&mut self, period: usize, channel: ChannelIndex, event: Event) {
        self.stores.periods[period][channel]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Events collected by a worker that cannot reach the collection directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialIngest {
    range: Range<ChannelIndex>,
    periods: Vec<BTreeMap<ChannelIndex, EventList>>,
}

impl PartialIngest {
    #[must_use]
    pub fn new(range: Range<ChannelIndex>, n_periods: usize) -> Self {
        Self {
            range,
            periods: vec![BTreeMap::new(); n_periods],
        }
    }

    #[must_use]
    pub fn n_events(&self) -> usize {
        self.periods
            .iter()
            .flat_map(BTreeMap::values)
            .map(EventList::len)
            .sum()
    }

    /// Appends every buffered event to `targets`, in channel order.
    ///
    /// # Errors
    /// Returns [`Error::Worker`] if the buffer addresses a period or channel
    /// the targets do not have.
    pub fn merge_into(self, targets: &mut [&mut [EventList]]) -> Result<()> {
        let n_periods = targets.len();
        for (period, channels) in self.periods.into_iter().enumerate() {
            let stores = targets.get_mut(period).ok_or_else(|| {
                Error::Worker(format!(
                    "partial result has period {period} but only {n_periods} exist"
                ))
            })?;
            for (channel, list) in channels {
                let n_channels = stores.len();
                let store = stores.get_mut(channel).ok_or_else(|| {
                    Error::Worker(format!(
                        "partial result has channel {channel} but only {n_channels} exist"
                    ))
                })?;
                store.reserve(list.len());
                for &event in list.events() {
                    store.push(event);
                }
            }
        }
        Ok(())
    }
}

impl EventSink for PartialIngest {
    fn channel_range(&self) -> Range<ChannelIndex> {
        self.range.clone()
    }

    fn push(&mut self, period: usize, channel: ChannelIndex, event: Event) {
        self.periods[period].entry(channel).or_default().push(event);
    }
}
