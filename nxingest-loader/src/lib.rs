//! nxingest-loader: Parallel event ingestion for nxingest.
//!
//! This crate turns the banks of an [`nxingest_io::EventSource`] into a
//! finalized [`nxingest_core::EventWorkspaceCollection`]:
//! - **Offsets** - per-bank raw-id to channel translation
//! - **Workers** - routing, filtering and period selection per bank
//! - **Sinks** - disjoint slices, per-channel locks, or process-local buffers
//! - **Dispatch** - sequential, a rayon pool, or launched worker processes
//!

mod config;
mod dispatch;
mod error;
mod filter;
mod loader;
mod offset;
mod report;
pub mod sink;
mod worker;

pub use config::{DispatchKind, LoaderConfig};
pub use dispatch::{
    run_job, serve_job, BankJob, Dispatch, JobOutput, JobReply, LocalLauncher, WorkerLauncher,
};
pub use error::{Error, Result};
pub use filter::{EventFilter, TimeWindow, TofWindow};
pub use loader::{EventLoader, LoadResult};
pub use offset::{confirm_offset, resolve_bank_offset, BankRouting};
pub use report::{BankIngestionReport, LoadReport};
pub use sink::{EventSink, PartialIngest};
pub use worker::{ingest_bank, precount_bank, IngestContext};
