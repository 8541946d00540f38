#![allow(dead_code)]

use nxingest_core::{
    ChannelMapping, Event, ExperimentMetadata, Instrument, PulseTime, PulseTimeIndex,
};
use nxingest_io::{MemoryBank, MemoryRunLog, MemorySource};
use nxingest_loader::{LoadResult, LoaderConfig};
use std::sync::Arc;

pub const PULSE_PERIOD_NS: i64 = 1_000;

/// Pulses at 0, 1000, 2000, ... ns.
pub fn pulses(n: i64) -> PulseTimeIndex {
    PulseTimeIndex::new((0..n).map(|i| PulseTime(i * PULSE_PERIOD_NS)).collect()).unwrap()
}

/// bank1 holds detectors 100..=102, bank2 holds 200..=201.
pub fn two_bank_instrument() -> Instrument {
    Instrument::new("TWOBANK")
        .with_bank("bank1", vec![100, 101, 102])
        .with_bank("bank2", vec![200, 201])
}

pub fn one_to_one(instrument: &Instrument) -> Arc<ChannelMapping> {
    Arc::new(ChannelMapping::one_to_one(instrument.detector_ids()).unwrap())
}

pub fn metadata(instrument: Instrument) -> Arc<ExperimentMetadata> {
    Arc::new(ExperimentMetadata::new("test run", Arc::new(instrument)))
}

/// Every event's TOF encodes its raw id: `id * 10 + k`.
pub fn two_bank_source() -> MemorySource {
    MemorySource::new()
        .with_bank(MemoryBank::new("bank1").with_events(&[
            (100, 1000.0, 0),
            (101, 1010.0, 0),
            (102, 1020.0, 1),
            (100, 1001.0, 2),
            (101, 1011.0, 2),
        ]))
        .with_bank(MemoryBank::new("bank2").with_events(&[
            (200, 2000.0, 0),
            (201, 2010.0, 1),
            (200, 2001.0, 2),
        ]))
}

pub fn run_log() -> MemoryRunLog {
    MemoryRunLog::new().with_pulse_times(pulses(3))
}

pub fn config() -> LoaderConfig {
    LoaderConfig::default().with_chunk_events(2).with_workers(2)
}

/// Events per period and channel.
pub fn snapshot(result: &LoadResult) -> Vec<Vec<Vec<Event>>> {
    result
        .collection
        .members()
        .iter()
        .map(|member| {
            member
                .stores()
                .iter()
                .map(|list| list.events().to_vec())
                .collect()
        })
        .collect()
}

pub fn tofs(result: &LoadResult, channel: usize, period: usize) -> Vec<f64> {
    result
        .collection
        .channel_in_period(channel, period)
        .unwrap()
        .tofs()
}
