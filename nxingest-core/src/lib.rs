//! nxingest-core: Data model for neutron event ingestion.
//!
//! This crate provides events and per-channel event lists, the
//! detector-to-channel mapping, pulse and period lookup, shared experiment
//! metadata, and the period-aware workspace collection that loads write into.
//!

pub mod collection;
pub mod error;
pub mod event;
pub mod event_list;
pub mod mapping;
pub mod metadata;
pub mod period;
pub mod pulse;

pub use collection::{
    CollectionState, CombinedOutput, EventWorkspaceCollection, PeriodMember, PeriodWorkspace,
    SpectrumInfo, WorkspaceGroup,
};
pub use error::{Error, Result};
pub use event::{Event, PulseTime, MAX_PLAUSIBLE_TOF_US};
pub use event_list::{BinEdges, ChannelData, EventList, Histogram, SortOrder};
pub use mapping::{ChannelIndex, ChannelMapping, DetectorId, DetectorLookup, SpectrumNumber};
pub use metadata::{
    BankGeometry, CURRENT_PERIOD_LOG, ExperimentMetadata, Instrument, LogValue, MetadataView, PeriodOverrides,
    Position, SampleShape, TimeSeries,
};
pub use period::{split_by_period, NormalizedPeriodLog, PeriodCorrupted, PeriodLog};
pub use pulse::PulseTimeIndex;
