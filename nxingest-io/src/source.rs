//! Storage abstraction for raw event banks and run logs.

use crate::{Error, Result};
use nxingest_core::{DetectorId, PeriodLog, PulseTimeIndex};

/// One raw record as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRecord {
    pub event_id: DetectorId,
    /// Time-of-flight in microseconds.
    pub tof: f64,
    pub pulse_index: u32,
    pub weight: Option<f32>,
}

/// A column-oriented block of raw records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordChunk {
    pub event_id: Vec<DetectorId>,
    pub tof: Vec<f64>,
    pub pulse_index: Vec<u32>,
    pub weight: Option<Vec<f32>>,
}

impl RecordChunk {
    /// Creates an empty chunk with room for `capacity` records.
    #[must_use]
    pub fn with_capacity(capacity: usize, weighted: bool) -> Self {
        Self {
            event_id: Vec::with_capacity(capacity),
            tof: Vec::with_capacity(capacity),
            pulse_index: Vec::with_capacity(capacity),
            weight: weighted.then(|| Vec::with_capacity(capacity)),
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.event_id.len()
    }

    /// Returns true when the chunk has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.event_id.is_empty()
    }

    /// Checks that every column has the same length.
    ///
    /// # Errors
    /// Returns [`Error::CorruptedBank`] naming the mismatched column.
    pub fn validate(&self, bank: &str) -> Result<()> {
        let n = self.event_id.len();
        let mismatch = |column: &str, len: usize| {
            Error::corrupted(
                bank,
                format!("{column} has {len} entries but event_id has {n}"),
            )
        };
        if self.tof.len() != n {
            return Err(mismatch("event_time_offset", self.tof.len()));
        }
        if self.pulse_index.len() != n {
            return Err(mismatch("pulse_index", self.pulse_index.len()));
        }
        if let Some(weight) = &self.weight {
            if weight.len() != n {
                return Err(mismatch("event_weight", weight.len()));
            }
        }
        Ok(())
    }

    /// Record `i`.
    #[must_use]
    pub fn record(&self, i: usize) -> RawRecord {
        RawRecord {
            event_id: self.event_id[i],
            tof: self.tof[i],
            pulse_index: self.pulse_index[i],
            weight: self.weight.as_ref().map(|w| w[i]),
        }
    }

    /// Iterates over the records. The chunk must be valid.
    pub fn iter(&self) -> impl Iterator<Item = RawRecord> + '_ {
        (0..self.len()).map(|i| self.record(i))
    }
}

/// Sequential reader over one bank.
pub trait BankReader {
    /// Bank name.
    fn name(&self) -> &str;

    /// Total records in the bank.
    fn len(&self) -> usize;

    /// Returns true when the bank has no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the first record, used to derive the bank offset.
    ///
    /// # Errors
    /// Returns an error if the storage cannot be read.
    fn first_event_id(&mut self) -> Result<Option<DetectorId>>;

    /// The bank's own pulse table (`event_time_zero`), if stored.
    fn pulse_times(&self) -> Option<&PulseTimeIndex>;

    /// True when records are in ascending pulse order.
    fn is_sorted_by_pulse(&self) -> bool;

    /// Next block of at most `max` records; `None` once exhausted.
    ///
    /// # Errors
    /// Returns [`Error::CorruptedBank`] when columns disagree, or a storage error.
    fn read_chunk(&mut self, max: usize) -> Result<Option<RecordChunk>>;

    /// Restarts reading from the first record.
    ///
    /// # Errors
    /// Returns an error if the storage cannot be re-read.
    fn rewind(&mut self) -> Result<()>;
}

/// A collection of named banks.
pub trait EventSource: Send + Sync {
    /// Names of all banks, in storage order.
    ///
    /// # Errors
    /// Returns an error if the storage cannot be listed.
    fn bank_names(&self) -> Result<Vec<String>>;

    /// Opens `name` for reading.
    ///
    /// # Errors
    /// Returns [`Error::MissingBank`] if no such bank exists.
    fn open_bank(&self, name: &str) -> Result<Box<dyn BankReader + '_>>;
}

/// Run-level logs read independently of event ingestion.
///
/// Each item may be absent.
pub trait RunLogSource: Send + Sync {
    /// `(time, period number)` pairs.
    ///
    /// # Errors
    /// Returns an error if the log exists but cannot be read.
    fn period_log(&self) -> Result<Option<PeriodLog>>;

    /// Number of periods the file declares.
    ///
    /// # Errors
    /// Returns an error if the value exists but cannot be read.
    fn declared_periods(&self) -> Result<Option<usize>>;

    /// Pulse table from the proton-charge log.
    ///
    /// # Errors
    /// Returns an error if the log exists but cannot be read.
    fn pulse_times(&self) -> Result<Option<PulseTimeIndex>>;
}
