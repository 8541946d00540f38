//! Per-bank ingestion: read records, route, filter, append.

use crate::filter::EventFilter;
use crate::offset::BankRouting;
use crate::report::BankIngestionReport;
use crate::sink::EventSink;
use crate::{Error, Result};
use nxingest_core::{ChannelIndex, DetectorLookup, Event, NormalizedPeriodLog, PulseTimeIndex};
use nxingest_io::{BankReader, RawRecord};
use std::collections::BTreeMap;

/// Read-only inputs shared by every worker of one load.
#[derive(Debug, Clone, Copy)]
pub struct IngestContext<'a> {
    /// Detector lookup covering at least the channels the sink accepts.
    pub lookup: &'a DetectorLookup,
    pub filter: &'a EventFilter,
    pub periods: &'a NormalizedPeriodLog,
    /// Run-level pulse table, used when a bank has none of its own.
    pub run_pulses: Option<&'a PulseTimeIndex>,
    pub chunk_events: usize,
}

/// Ingests every record of `reader` into `sink`.
///
/// Unmapped ids and filtered events are counted, never errors. Events keep
/// the bank's on-disk order.
///
/// # Errors
/// [`Error::BankRecordCorrupted`] for a malformed stream or a pulse index past
/// the pulse table, [`Error::MissingPulseTimes`] when no pulse table exists.
pub fn ingest_bank<S: EventSink + ?Sized>(
    reader: &mut dyn BankReader,
    routing: BankRouting,
    ctx: &IngestContext<'_>,
    sink: &mut S,
) -> Result<BankIngestionReport> {
    let bank = reader.name().to_string();
    let mut report = BankIngestionReport::new(&bank, ctx.periods.n_periods());
    let pulses = match reader.pulse_times().cloned() {
        Some(own) => Some(own),
        None => ctx.run_pulses.cloned(),
    };
    if pulses.is_none() && routing.is_mapped() && !reader.is_empty() {
        return Err(Error::MissingPulseTimes { bank });
    }
    if !reader.is_sorted_by_pulse() {
        log::debug!("bank '{bank}': records are not in pulse order");
    }

    while let Some(chunk) = reader.read_chunk(ctx.chunk_events.max(1))? {
        for record in chunk.iter() {
            report.events_read += 1;
            let Some(channel) = routing
                .route(ctx.lookup, record.event_id)
                .filter(|&c| sink.accepts(c))
            else {
                report.events_discarded_unmapped += 1;
                continue;
            };
            if !ctx.filter.accepts_tof(record.tof) {
                report.events_discarded_by_filter += 1;
                continue;
            }
            let event = resolve_event(&bank, &record, pulses.as_ref())?;
            if !ctx.filter.accepts_time(event.pulse_time) {
                report.events_discarded_by_filter += 1;
                continue;
            }
            if event.has_suspicious_tof() {
                report.suspicious_tof += 1;
            }
            let period = ctx.periods.period_index_at(event.pulse_time);
            sink.push(period, channel, event);
            report.record_kept(period, record.tof);
        }
    }

    log::debug!(
        "bank '{bank}': kept {} of {} events ({} unmapped, {} filtered)",
        report.events_kept,
        report.events_read,
        report.events_discarded_unmapped,
        report.events_discarded_by_filter
    );
    if report.suspicious_tof > 0 {
        log::warn!(
            "bank '{bank}': {} events with a negative or implausibly large TOF",
            report.suspicious_tof
        );
    }
    Ok(report)
}

fn resolve_event(bank: &str, record: &RawRecord, pulses: Option<&PulseTimeIndex>) -> Result<Event> {
    let pulses = pulses.ok_or_else(|| Error::MissingPulseTimes {
        bank: bank.to_string(),
    })?;
    let pulse_time = pulses.get(record.pulse_index).ok_or_else(|| {
        Error::corrupted(
            bank,
            format!(
                "pulse index {} beyond pulse table of {} entries",
                record.pulse_index,
                pulses.len()
            ),
        )
    })?;
    Ok(Event::weighted(
        record.tof,
        pulse_time,
        record.weight.unwrap_or(1.0),
    ))
}

/// Mapped events per channel, for reserving storage before ingestion.
///
/// Leaves `reader` rewound.
///
/// # Errors
/// Returns a storage or corruption error from the reader.
pub fn precount_bank(
    reader: &mut dyn BankReader,
    routing: BankRouting,
    lookup: &DetectorLookup,
    chunk_events: usize,
) -> Result<BTreeMap<ChannelIndex, usize>> {
    let mut counts = BTreeMap::new();
    if routing.is_mapped() {
        while let Some(chunk) = reader.read_chunk(chunk_events.max(1))? {
            for &id in &chunk.event_id {
                if let Some(channel) = routing.route(lookup, id) {
                    *counts.entry(channel).or_insert(0) += 1;
                }
            }
        }
    }
    reader.rewind()?;
    Ok(counts)
}
