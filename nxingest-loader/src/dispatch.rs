//! Worker dispatch strategies and the process-worker wire format.
//!
//! Threads and the calling thread write straight into the collection. A
//! [`WorkerLauncher`] instead runs each [`BankJob`] somewhere without access
//! to it (another process, in practice) and hands back a [`JobOutput`] that
//! is merged at the join barrier.

use crate::filter::EventFilter;
use crate::offset::BankRouting;
use crate::report::BankIngestionReport;
use crate::sink::PartialIngest;
use crate::worker::{ingest_bank, IngestContext};
use crate::{Error, Result};
use nxingest_core::{ChannelIndex, DetectorLookup, NormalizedPeriodLog, PulseTimeIndex};
use nxingest_io::EventSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::ops::Range;

/// Where bank work runs.
#[derive(Clone, Copy)]
pub enum Dispatch<'a> {
    /// Every bank on the calling thread.
    Sequential,
    /// A rayon pool of at most `workers` threads.
    Threads { workers: usize },
    /// One job per bank through a launcher.
    Processes(&'a dyn WorkerLauncher),
}

impl fmt::Debug for Dispatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("Sequential"),
            Self::Threads { workers } => write!(f, "Threads({workers})"),
            Self::Processes(_) => f.write_str("Processes"),
        }
    }
}

/// Everything a worker needs to ingest one bank on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankJob {
    pub bank: String,
    pub routing: BankRouting,
    /// Channels the worker may buffer.
    pub channels: Range<ChannelIndex>,
    /// Detectors of `channels` only.
    pub lookup: DetectorLookup,
    pub filter: EventFilter,
    pub periods: NormalizedPeriodLog,
    pub run_pulses: Option<PulseTimeIndex>,
    pub chunk_events: usize,
}

/// What a finished job sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub report: BankIngestionReport,
    pub partial: PartialIngest,
}

/// Job result as it crosses the process boundary.
///
/// Corruption and missing pulse times keep their type so the parent reports
/// them the same way an in-process worker would.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobReply {
    Done(JobOutput),
    Corrupted { bank: String, reason: String },
    MissingPulseTimes { bank: String },
    Failed(String),
}

impl From<Result<JobOutput>> for JobReply {
    fn from(result: Result<JobOutput>) -> Self {
        match result {
            Ok(output) => Self::Done(output),
            Err(Error::BankRecordCorrupted { bank, reason }) => Self::Corrupted { bank, reason },
            Err(Error::MissingPulseTimes { bank }) => Self::MissingPulseTimes { bank },
            Err(other) => Self::Failed(other.to_string()),
        }
    }
}

impl JobReply {
    /// # Errors
    /// The worker's error, retyped.
    pub fn into_result(self) -> Result<JobOutput> {
        match self {
            Self::Done(output) => Ok(output),
            Self::Corrupted { bank, reason } => Err(Error::BankRecordCorrupted { bank, reason }),
            Self::MissingPulseTimes { bank } => Err(Error::MissingPulseTimes { bank }),
            Self::Failed(message) => Err(Error::Worker(message)),
        }
    }
}

/// Runs one job against `source`.
///
/// # Errors
/// Any error from opening or ingesting the bank.
pub fn run_job(source: &dyn EventSource, job: &BankJob) -> Result<JobOutput> {
    let mut reader = source.open_bank(&job.bank)?;
    let ctx = IngestContext {
        lookup: &job.lookup,
        filter: &job.filter,
        periods: &job.periods,
        run_pulses: job.run_pulses.as_ref(),
        chunk_events: job.chunk_events,
    };
    let mut partial = PartialIngest::new(job.channels.clone(), job.periods.n_periods());
    let report = ingest_bank(reader.as_mut(), job.routing, &ctx, &mut partial)?;
    Ok(JobOutput { report, partial })
}

/// Worker side of the wire format: one JSON [`BankJob`] in, one JSON
/// [`JobReply`] out.
///
/// # Errors
/// Only when the job cannot be parsed or the reply cannot be written;
/// ingestion failures are sent as a reply.
pub fn serve_job<R: Read, W: Write>(source: &dyn EventSource, input: R, output: W) -> Result<()> {
    let job: BankJob = serde_json::from_reader(input)?;
    log::debug!("worker: bank '{}'", job.bank);
    let reply = JobReply::from(run_job(source, &job));
    serde_json::to_writer(output, &reply)?;
    Ok(())
}

/// Runs jobs outside the collection.
pub trait WorkerLauncher: Sync {
    /// Runs `job` to completion.
    ///
    /// # Errors
    /// The worker's error, or [`Error::Worker`] if it could not be run.
    fn launch(&self, job: &BankJob) -> Result<JobOutput>;
}

/// In-process launcher that still goes through the wire format.
#[derive(Clone, Copy)]
pub struct LocalLauncher<'a> {
    source: &'a dyn EventSource,
}

impl<'a> LocalLauncher<'a> {
    #[must_use]
    pub fn new(source: &'a dyn EventSource) -> Self {
        Self { source }
    }
}

impl WorkerLauncher for LocalLauncher<'_> {
    fn launch(&self, job: &BankJob) -> Result<JobOutput> {
        let request = serde_json::to_vec(job)?;
        let mut response = Vec::new();
        serve_job(self.source, request.as_slice(), &mut response)?;
        let reply: JobReply = serde_json::from_slice(&response)?;
        reply.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nxingest_core::{ChannelMapping, PulseTime, PulseTimeIndex};
    use nxingest_io::{MemoryBank, MemorySource};

    fn job(bank: &str) -> BankJob {
        BankJob {
            bank: bank.to_string(),
            routing: BankRouting::Offset(100),
            channels: 0..3,
            lookup: ChannelMapping::one_to_one([100, 101, 102])
                .unwrap()
                .detector_lookup()
                .clone(),
            filter: EventFilter::default(),
            periods: NormalizedPeriodLog::single(),
            run_pulses: Some(PulseTimeIndex::new(vec![PulseTime(0), PulseTime(10)]).unwrap()),
            chunk_events: 16,
        }
    }

    fn source() -> MemorySource {
        MemorySource::new()
            .with_bank(MemoryBank::new("bank1").with_events(&[(100, 1.0, 0), (102, 2.0, 1)]))
            .with_bank(MemoryBank::new("broken").with_events(&[(100, 1.0, 5)]))
    }

    #[test]
    fn test_local_launcher_matches_direct_run() {
        let source = source();
        let direct = run_job(&source, &job("bank1")).unwrap();
        let launched = LocalLauncher::new(&source).launch(&job("bank1")).unwrap();
        assert_eq!(direct, launched);
        assert_eq!(launched.partial.n_events(), 2);
    }

    #[test]
    fn test_typed_errors_cross_the_wire() {
        let source = source();
        let err = LocalLauncher::new(&source).launch(&job("broken")).unwrap_err();
        assert!(matches!(err, Error::BankRecordCorrupted { ref bank, .. } if bank == "broken"));

        let err = LocalLauncher::new(&source).launch(&job("nope")).unwrap_err();
        assert!(matches!(err, Error::Worker(ref msg) if msg.contains("nope")));
    }

    #[test]
    fn test_job_with_period_zero_is_rejected() {
        let mut value = serde_json::to_value(job("bank1")).unwrap();
        value["periods"]["entries"] = serde_json::json!([[0, 0]]);
        let request = serde_json::to_vec(&value).unwrap();
        let err = serve_job(&source(), request.as_slice(), Vec::new()).unwrap_err();
        assert!(err.to_string().contains("period 0"), "{err}");
    }

    #[test]
    fn test_job_carries_only_its_channels() {
        let table = [(1, vec![100]), (2, vec![101]), (3, vec![5_000_000])];
        let mapping = ChannelMapping::from_spectra_table(&table).unwrap();
        let mut job = job("bank1");
        job.channels = 0..2;
        job.lookup = mapping.detector_lookup().restricted_to(&job.channels);
        assert!(job.lookup.is_dense());
        assert_eq!(job.lookup.channel_of(5_000_000), None);
        let output = LocalLauncher::new(&source()).launch(&job).unwrap();
        // 102 is not among the job's detectors.
        assert_eq!(output.report.events_kept, 1);
        assert_eq!(output.report.events_discarded_unmapped, 1);
    }

    #[test]
    fn test_dispatch_debug() {
        assert_eq!(format!("{:?}", Dispatch::Threads { workers: 4 }), "Threads(4)");
    }
}
