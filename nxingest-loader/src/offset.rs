//! Per-bank offset between raw event ids and channel indices.

use nxingest_core::{ChannelIndex, ChannelMapping, DetectorId, DetectorLookup};
use serde::{Deserialize, Serialize};

/// How a bank's raw ids translate to channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankRouting {
    /// `channel = raw_id - offset`.
    Offset(i32),
    /// Ids are not contiguous with channels (grouped detectors, gaps, or a
    /// bank the geometry does not list); each event is looked up.
    Lookup,
    /// No sample id resolved; every event of the bank is discarded.
    Unmapped,
}

impl BankRouting {
    /// Channel the offset arithmetic gives for `raw_id`.
    #[inline]
    #[must_use]
    pub fn channel_of(&self, raw_id: DetectorId) -> Option<ChannelIndex> {
        match *self {
            Self::Offset(offset) => {
                let channel = i64::from(raw_id) - i64::from(offset);
                ChannelIndex::try_from(channel).ok()
            }
            Self::Lookup | Self::Unmapped => None,
        }
    }

    /// Channel for an event with `raw_id`, or `None` if it is unmapped.
    ///
    /// Offset routing keeps an event only when `lookup` agrees, so ids outside
    /// the bank never land in a neighbour's channel.
    #[inline]
    #[must_use]
    pub fn route(&self, lookup: &DetectorLookup, raw_id: DetectorId) -> Option<ChannelIndex> {
        match self {
            Self::Offset(_) => self
                .channel_of(raw_id)
                .filter(|&channel| lookup.channel_of(raw_id) == Some(channel)),
            Self::Lookup => lookup.channel_of(raw_id),
            Self::Unmapped => None,
        }
    }

    #[must_use]
    pub fn is_mapped(&self) -> bool {
        !matches!(self, Self::Unmapped)
    }
}

/// Offset that takes `sample_raw_id` to its mapped channel.
///
/// Returns [`BankRouting::Unmapped`] when the sample is absent, not in the
/// mapping, or the offset does not fit in an `i32`.
#[must_use]
pub fn resolve_bank_offset(
    mapping: &ChannelMapping,
    bank_name: &str,
    sample_raw_id: Option<DetectorId>,
) -> BankRouting {
    let Some(sample) = sample_raw_id else {
        log::debug!("bank '{bank_name}': no sample id, bank is unmapped");
        return BankRouting::Unmapped;
    };
    let Some(channel) = mapping.channel_of_detector(sample) else {
        log::warn!("bank '{bank_name}': sample id {sample} is not mapped; its events are discarded");
        return BankRouting::Unmapped;
    };
    let offset = i64::try_from(channel)
        .ok()
        .and_then(|c| i32::try_from(i64::from(sample) - c).ok());
    match offset {
        Some(offset) => {
            log::debug!("bank '{bank_name}': offset {offset} (id {sample} -> channel {channel})");
            BankRouting::Offset(offset)
        }
        None => {
            log::warn!("bank '{bank_name}': offset for id {sample} does not fit in i32");
            BankRouting::Unmapped
        }
    }
}

/// Keeps an offset only if every mapped id of the bank sits at `id - offset`.
///
/// Otherwise the bank falls back to [`BankRouting::Lookup`], so grouped or
/// gapped detector ids are still routed to their channels.
#[must_use]
pub fn confirm_offset(
    mapping: &ChannelMapping,
    bank_name: &str,
    routing: BankRouting,
    detector_ids: &[DetectorId],
) -> BankRouting {
    let BankRouting::Offset(offset) = routing else {
        return routing;
    };
    let breaking = detector_ids.iter().copied().find(|&id| {
        mapping
            .channel_of_detector(id)
            .is_some_and(|channel| routing.channel_of(id) != Some(channel))
    });
    match breaking {
        Some(id) => {
            log::info!(
                "bank '{bank_name}': detector {id} is not at offset {offset}; \
                 routing each event through the mapping"
            );
            BankRouting::Lookup
        }
        None => routing,
    }
}
