//! Detector-to-channel mapping.
//!
//! A [`ChannelMapping`] is built once, before ingestion, by whoever loads the
//! instrument geometry. It is then shared read-only (behind an `Arc`) by every
//! ingestion worker, so lookups take `&self` and never allocate.

use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Physical detector (pixel) identifier as written in event files.
pub type DetectorId = u32;

/// User-facing spectrum number (1-based by convention).
pub type SpectrumNumber = i32;

/// Contiguous 0-based channel index within a workspace.
pub type ChannelIndex = usize;

/// A dense table may hold at most this many slots per mapped detector.
const DENSE_SLOTS_PER_DETECTOR: usize = 4;

/// Spans up to this many slots stay dense however few detectors they hold.
const DENSE_MIN_SLOTS: usize = 4096;

/// `detector_id -> channel` lookup.
///
/// Compact id ranges use a table indexed by `id - min`; ids spread too widely
/// for that fall back to an ordered map with the same answers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DetectorLookup {
    Dense {
        min: DetectorId,
        slots: Vec<Option<ChannelIndex>>,
    },
    Sparse(BTreeMap<DetectorId, ChannelIndex>),
}

impl Default for DetectorLookup {
    fn default() -> Self {
        Self::Dense {
            min: 0,
            slots: Vec::new(),
        }
    }
}

impl DetectorLookup {
    /// Picks the dense table when the id span is small enough for `owner`.
    #[must_use]
    pub fn new(owner: BTreeMap<DetectorId, ChannelIndex>) -> Self {
        let bounds = owner.first_key_value().zip(owner.last_key_value());
        let Some(((&lo, _), (&hi, _))) = bounds else {
            return Self::default();
        };
        let span = ((hi - lo) as usize).saturating_add(1);
        if span > DENSE_MIN_SLOTS.max(owner.len().saturating_mul(DENSE_SLOTS_PER_DETECTOR)) {
            return Self::Sparse(owner);
        }
        let mut slots = vec![None; span];
        for (&det, &channel) in &owner {
            slots[(det - lo) as usize] = Some(channel);
        }
        Self::Dense { min: lo, slots }
    }

    /// Channel of `detector`: O(1) dense, O(log n) sparse.
    #[inline]
    #[must_use]
    pub fn channel_of(&self, detector: DetectorId) -> Option<ChannelIndex> {
        match self {
            Self::Dense { min, slots } => {
                let slot = detector.checked_sub(*min)? as usize;
                slots.get(slot).copied().flatten()
            }
            Self::Sparse(map) => map.get(&detector).copied(),
        }
    }

    #[must_use]
    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense { .. })
    }

    /// Mapped `(detector, channel)` pairs, ascending by detector.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (DetectorId, ChannelIndex)> + '_> {
        match self {
            Self::Dense { min, slots } => Box::new(
                slots
                    .iter()
                    .enumerate()
                    .filter_map(move |(slot, c)| c.map(|c| (min + slot as DetectorId, c))),
            ),
            Self::Sparse(map) => Box::new(map.iter().map(|(&d, &c)| (d, c))),
        }
    }

    /// Only the detectors whose channel lies in `channels`.
    #[must_use]
    pub fn restricted_to(&self, channels: &Range<ChannelIndex>) -> Self {
        Self::new(self.iter().filter(|(_, c)| channels.contains(c)).collect())
    }
}

/// Lookup tables between detectors, spectra and channels.
///
/// Several detectors may map to the same channel (grouped detectors); every
/// detector maps to at most one channel.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelMapping {
    detectors: DetectorLookup,
    spectrum_to_channel: BTreeMap<SpectrumNumber, ChannelIndex>,
    channel_spectra: Vec<SpectrumNumber>,
    channel_detectors: Vec<BTreeSet<DetectorId>>,
}

impl ChannelMapping {
    /// One channel per detector, in ascending detector-id order.
    ///
    /// Channel `i` gets spectrum number `i + 1`. Duplicate ids are collapsed.
    ///
    /// # Errors
    /// Returns an error if the spectrum numbers would overflow.
    pub fn one_to_one(detector_ids: impl IntoIterator<Item = DetectorId>) -> Result<Self> {
        let ids: BTreeSet<DetectorId> = detector_ids.into_iter().collect();
        let table = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                let spectrum = SpectrumNumber::try_from(i + 1)
                    .map_err(|_| Error::Mapping(format!("too many channels ({})", i + 1)))?;
                Ok((spectrum, vec![id]))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_spectra_table(&table)
    }

    /// Builds the mapping from an explicit spectrum table.
    ///
    /// Row `i` becomes channel `i`; it lists the spectrum number and the
    /// detectors grouped into it. A row may have no detectors.
    ///
    /// # Errors
    /// Returns [`Error::Mapping`] on duplicate spectrum numbers or when a
    /// detector appears in more than one row.
    pub fn from_spectra_table(table: &[(SpectrumNumber, Vec<DetectorId>)]) -> Result<Self> {
        let mut spectrum_to_channel = BTreeMap::new();
        let mut owner: BTreeMap<DetectorId, ChannelIndex> = BTreeMap::new();
        let mut channel_spectra = Vec::with_capacity(table.len());
        let mut channel_detectors = Vec::with_capacity(table.len());

        for (channel, (spectrum, detectors)) in table.iter().enumerate() {
            if spectrum_to_channel.insert(*spectrum, channel).is_some() {
                return Err(Error::Mapping(format!(
                    "spectrum number {spectrum} appears more than once"
                )));
            }
            let mut set = BTreeSet::new();
            for &det in detectors {
                if let Some(prev) = owner.insert(det, channel) {
                    if prev != channel {
                        return Err(Error::Mapping(format!(
                            "detector {det} assigned to spectra {} and {spectrum}",
                            channel_spectra[prev]
                        )));
                    }
                }
                set.insert(det);
            }
            channel_spectra.push(*spectrum);
            channel_detectors.push(set);
        }

        Ok(Self {
            detectors: DetectorLookup::new(owner),
            spectrum_to_channel,
            channel_spectra,
            channel_detectors,
        })
    }

    /// Number of channels.
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.channel_spectra.len()
    }

    /// True when the mapping has no channels at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channel_spectra.is_empty()
    }

    /// Channel receiving events from `detector`.
    #[inline]
    #[must_use]
    pub fn channel_of_detector(&self, detector: DetectorId) -> Option<ChannelIndex> {
        self.detectors.channel_of(detector)
    }

    #[must_use]
    pub fn detector_lookup(&self) -> &DetectorLookup {
        &self.detectors
    }

    /// Channel carrying `spectrum`.
    #[must_use]
    pub fn channel_of_spectrum(&self, spectrum: SpectrumNumber) -> Option<ChannelIndex> {
        self.spectrum_to_channel.get(&spectrum).copied()
    }

    /// Spectrum number of `channel`.
    #[must_use]
    pub fn spectrum_of(&self, channel: ChannelIndex) -> Option<SpectrumNumber> {
        self.channel_spectra.get(channel).copied()
    }

    /// Detectors grouped into `channel`.
    #[must_use]
    pub fn detectors_of(&self, channel: ChannelIndex) -> Option<&BTreeSet<DetectorId>> {
        self.channel_detectors.get(channel)
    }

    /// Every mapped detector id, ascending.
    pub fn detector_ids(&self) -> impl Iterator<Item = DetectorId> + '_ {
        self.detectors.iter().map(|(det, _)| det)
    }

    /// Half-open range of channels written by the given detectors.
    ///
    /// Returns `None` if none of them are mapped.
    #[must_use]
    pub fn channel_span(&self, detectors: &[DetectorId]) -> Option<Range<ChannelIndex>> {
        let mut span: Option<(ChannelIndex, ChannelIndex)> = None;
        for channel in detectors.iter().filter_map(|&d| self.channel_of_detector(d)) {
            span = Some(match span {
                None => (channel, channel),
                Some((lo, hi)) => (lo.min(channel), hi.max(channel)),
            });
        }
        span.map(|(lo, hi)| lo..hi + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_to_one() {
        let map = ChannelMapping::one_to_one([201, 100, 102, 101, 200]).unwrap();
        assert_eq!(map.n_channels(), 5);
        assert_eq!(map.channel_of_detector(100), Some(0));
        assert_eq!(map.channel_of_detector(102), Some(2));
        assert_eq!(map.channel_of_detector(200), Some(3));
        assert_eq!(map.channel_of_detector(150), None);
        assert_eq!(map.channel_of_detector(99), None);
        assert_eq!(map.channel_of_detector(5000), None);
        assert_eq!(map.spectrum_of(3), Some(4));
        assert_eq!(map.channel_of_spectrum(1), Some(0));
        assert_eq!(
            map.detector_ids().collect::<Vec<_>>(),
            vec![100, 101, 102, 200, 201]
        );
    }

    #[test]
    fn test_grouped_detectors() {
        let table = [(10, vec![1, 2, 3]), (20, vec![7]), (30, vec![])];
        let map = ChannelMapping::from_spectra_table(&table).unwrap();
        assert_eq!(map.n_channels(), 3);
        assert_eq!(map.channel_of_detector(2), Some(0));
        assert_eq!(map.channel_of_detector(7), Some(1));
        assert_eq!(map.channel_of_detector(5), None);
        assert_eq!(
            map.detectors_of(0).unwrap().iter().copied().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(map.detectors_of(2).unwrap().is_empty());
        assert_eq!(map.channel_of_spectrum(30), Some(2));
    }

    #[test]
    fn test_detector_in_two_spectra_rejected() {
        let table = [(1, vec![1, 2]), (2, vec![2])];
        let err = ChannelMapping::from_spectra_table(&table).unwrap_err();
        assert!(err.to_string().contains("detector 2"), "{err}");
    }

    #[test]
    fn test_duplicate_spectrum_rejected() {
        assert!(ChannelMapping::from_spectra_table(&[(1, vec![1]), (1, vec![2])]).is_err());
    }

    #[test]
    fn test_channel_span() {
        let map = ChannelMapping::one_to_one([100, 101, 102, 200, 201]).unwrap();
        assert_eq!(map.channel_span(&[100, 101, 102]), Some(0..3));
        assert_eq!(map.channel_span(&[201, 200]), Some(3..5));
        assert_eq!(map.channel_span(&[7, 8]), None);
    }

    #[test]
    fn test_widely_spread_ids_use_sparse_lookup() {
        let map = ChannelMapping::one_to_one([1, 4_000_000_000, 7]).unwrap();
        assert!(!map.detector_lookup().is_dense());
        assert_eq!(map.channel_of_detector(1), Some(0));
        assert_eq!(map.channel_of_detector(7), Some(1));
        assert_eq!(map.channel_of_detector(4_000_000_000), Some(2));
        assert_eq!(map.channel_of_detector(2), None);
        assert_eq!(map.channel_of_detector(u32::MAX), None);
        assert_eq!(
            map.detector_ids().collect::<Vec<_>>(),
            vec![1, 7, 4_000_000_000]
        );
        assert_eq!(map.channel_span(&[7, 4_000_000_000]), Some(1..3));
    }

    #[test]
    fn test_compact_ids_stay_dense() {
        let map = ChannelMapping::one_to_one((1000..1100).step_by(3)).unwrap();
        assert!(map.detector_lookup().is_dense());
        assert_eq!(map.channel_of_detector(1003), Some(1));
        assert_eq!(map.channel_of_detector(1004), None);
    }

    #[test]
    fn test_restricted_lookup() {
        let table = [(1, vec![100, 101]), (2, vec![102]), (3, vec![9_000_000])];
        let map = ChannelMapping::from_spectra_table(&table).unwrap();
        let lookup = map.detector_lookup().restricted_to(&(1..3));
        assert_eq!(lookup.channel_of(100), None);
        assert_eq!(lookup.channel_of(102), Some(1));
        assert_eq!(lookup.channel_of(9_000_000), Some(2));
        assert_eq!(lookup.iter().count(), 2);
    }

    #[test]
    fn test_empty_mapping() {
        let map = ChannelMapping::one_to_one([]).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.channel_of_detector(0), None);
    }
}
