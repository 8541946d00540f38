//! Loader error types.

use nxingest_core::PeriodCorrupted;
use thiserror::Error;

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Loader error types.
#[derive(Error, Debug)]
pub enum Error {
    /// The channel mapping has no channels.
    #[error("no channel mapping: nothing to route events into")]
    MissingChannelMapping,

    /// A bank's record stream is malformed.
    #[error("bank '{bank}' record stream corrupted: {reason}")]
    BankRecordCorrupted { bank: String, reason: String },

    /// Period log inconsistent with the declared period count.
    #[error("period log corrupted: {0}")]
    PeriodCorrupted(#[from] PeriodCorrupted),

    /// Neither the run log nor the bank provide pulse times.
    #[error("no pulse times for bank '{bank}' in the run log or the bank itself")]
    MissingPulseTimes { bank: String },

    /// The caller interrupted the load.
    #[error("load cancelled")]
    Cancelled,

    /// Invalid loader configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A worker could not be started or returned unusable output.
    #[error("worker failed: {0}")]
    Worker(String),

    /// JSON parse error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Storage error.
    #[error("source error: {0}")]
    Source(nxingest_io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] nxingest_core::Error),
}

impl Error {
    /// True for [`Error::Cancelled`], which callers treat apart from failures.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn corrupted(bank: &str, reason: impl Into<String>) -> Self {
        Self::BankRecordCorrupted {
            bank: bank.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<nxingest_io::Error> for Error {
    fn from(err: nxingest_io::Error) -> Self {
        match err {
            nxingest_io::Error::CorruptedBank { bank, reason } => {
                Self::BankRecordCorrupted { bank, reason }
            }
            other => Self::Source(other),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Source(nxingest_io::Error::Io(err))
    }
}
