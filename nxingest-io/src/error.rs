//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Requested bank does not exist in the source.
    #[error("bank '{0}' not found")]
    MissingBank(String),

    /// Record columns of a bank are inconsistent.
    #[error("bank '{bank}' record stream corrupted: {reason}")]
    CorruptedBank { bank: String, reason: String },

    /// JSON parse error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] nxingest_core::Error),
}

impl Error {
    pub(crate) fn corrupted(bank: &str, reason: impl Into<String>) -> Self {
        Self::CorruptedBank {
            bank: bank.to_string(),
            reason: reason.into(),
        }
    }
}
