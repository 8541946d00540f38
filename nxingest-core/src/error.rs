//! Error types for nxingest-core.

use crate::collection::CollectionState;
use crate::period::PeriodCorrupted;
use thiserror::Error;

/// Result type alias for nxingest-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Channel index outside the padded channel range.
    #[error("channel index {index} out of range for {n_channels} channels")]
    ChannelOutOfRange { index: usize, n_channels: usize },

    /// Period index outside the configured period range.
    #[error("period index {index} out of range for {n_periods} periods")]
    PeriodOutOfRange { index: usize, n_periods: usize },

    /// An operation was attempted in a state that does not allow it.
    #[error("cannot {operation} while the collection is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: CollectionState,
    },

    /// A period count of zero was requested.
    #[error("a collection needs at least one period")]
    NoPeriods,

    /// Period log inconsistent with the declared period count.
    #[error(transparent)]
    PeriodCorrupted(#[from] PeriodCorrupted),

    /// Channel mapping could not be built.
    #[error("channel mapping error: {0}")]
    Mapping(String),

    /// Pulse table is not sorted by time.
    #[error("pulse times are not sorted (index {0} precedes its predecessor)")]
    UnsortedPulseTimes(usize),

    /// Bin edges are not strictly increasing or too short.
    #[error("invalid bin edges: {0}")]
    InvalidBinEdges(String),

    /// Histogram conversion requested without bin edges.
    #[error("no bin edges set; call set_all_bin_edges before converting to histograms")]
    MissingBinEdges,
}
