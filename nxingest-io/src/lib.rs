//! nxingest-io: Event sources for nxingest.
//!
//! This crate provides the storage abstraction the loader reads banks and
//! run logs through, an in-memory source, instrument definitions from JSON,
//! and (with the `hdf5` feature) NeXus `NXevent_data` files.
//!

mod error;
pub mod geometry;
pub mod memory;
#[cfg(feature = "hdf5")]
pub mod nexus;
pub mod source;

pub use error::{Error, Result};
pub use geometry::InstrumentDefinition;
pub use memory::{MemoryBank, MemoryBankReader, MemoryRunLog, MemorySource};
#[cfg(feature = "hdf5")]
pub use nexus::{NexusBankReader, NexusEventFile, NexusWriter};
pub use source::{BankReader, EventSource, RawRecord, RecordChunk, RunLogSource};
