//! In-memory event sources for synthetic data and tests.

use crate::source::{BankReader, EventSource, RecordChunk, RunLogSource};
use crate::{Error, Result};
use nxingest_core::{DetectorId, PeriodLog, PulseTime, PulseTimeIndex};

/// A bank held entirely in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryBank {
    pub name: String,
    pub records: RecordChunk,
    pub pulse_times: Option<PulseTimeIndex>,
}

impl MemoryBank {
    /// Creates an empty bank.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends an unweighted record.
    ///
    /// If the bank already holds weights, the record gets weight 1.0.
    pub fn push(&mut self, event_id: DetectorId, tof: f64, pulse_index: u32) {
        self.records.event_id.push(event_id);
        self.records.tof.push(tof);
        self.records.pulse_index.push(pulse_index);
        if let Some(weight) = &mut self.records.weight {
            weight.push(1.0);
        }
    }

    /// Appends a weighted record, promoting earlier records to weight 1.0.
    pub fn push_weighted(&mut self, event_id: DetectorId, tof: f64, pulse_index: u32, weight: f32) {
        let n = self.records.len();
        self.records
            .weight
            .get_or_insert_with(|| vec![1.0; n])
            .push(weight);
        self.records.event_id.push(event_id);
        self.records.tof.push(tof);
        self.records.pulse_index.push(pulse_index);
    }

    /// Adds `(event_id, tof, pulse_index)` records.
    #[must_use]
    pub fn with_events(mut self, events: &[(DetectorId, f64, u32)]) -> Self {
        for &(id, tof, pulse) in events {
            self.push(id, tof, pulse);
        }
        self
    }

    /// Attaches the bank's own pulse table.
    #[must_use]
    pub fn with_pulse_times(mut self, pulse_times: PulseTimeIndex) -> Self {
        self.pulse_times = Some(pulse_times);
        self
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when the bank has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Banks held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    banks: Vec<MemoryBank>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bank. A bank with the same name is replaced.
    #[must_use]
    pub fn with_bank(mut self, bank: MemoryBank) -> Self {
        self.add_bank(bank);
        self
    }

    pub fn add_bank(&mut self, bank: MemoryBank) {
        match self.banks.iter_mut().find(|b| b.name == bank.name) {
            Some(existing) => *existing = bank,
            None => self.banks.push(bank),
        }
    }

    #[must_use]
    pub fn bank(&self, name: &str) -> Option<&MemoryBank> {
        self.banks.iter().find(|b| b.name == name)
    }

    #[must_use]
    pub fn banks(&self) -> &[MemoryBank] {
        &self.banks
    }
}

impl EventSource for MemorySource {
    fn bank_names(&self) -> Result<Vec<String>> {
        Ok(self.banks.iter().map(|b| b.name.clone()).collect())
    }

    fn open_bank(&self, name: &str) -> Result<Box<dyn BankReader + '_>> {
        let bank = self
            .bank(name)
            .ok_or_else(|| Error::MissingBank(name.to_string()))?;
        Ok(Box::new(MemoryBankReader::new(bank)))
    }
}

/// Reader lending chunks out of a [`MemoryBank`].
#[derive(Debug)]
pub struct MemoryBankReader<'a> {
    bank: &'a MemoryBank,
    cursor: usize,
    sorted: bool,
}

impl<'a> MemoryBankReader<'a> {
    #[must_use]
    pub fn new(bank: &'a MemoryBank) -> Self {
        let sorted = bank.records.pulse_index.windows(2).all(|w| w[0] <= w[1]);
        Self {
            bank,
            cursor: 0,
            sorted,
        }
    }
}

impl BankReader for MemoryBankReader<'_> {
    fn name(&self) -> &str {
        &self.bank.name
    }

    fn len(&self) -> usize {
        self.bank.len()
    }

    fn first_event_id(&mut self) -> Result<Option<DetectorId>> {
        Ok(self.bank.records.event_id.first().copied())
    }

    fn pulse_times(&self) -> Option<&PulseTimeIndex> {
        self.bank.pulse_times.as_ref()
    }

    fn is_sorted_by_pulse(&self) -> bool {
        self.sorted
    }

    fn read_chunk(&mut self, max: usize) -> Result<Option<RecordChunk>> {
        let records = &self.bank.records;
        if self.cursor == 0 {
            records.validate(&self.bank.name)?;
        }
        if self.cursor >= records.len() || max == 0 {
            return Ok(None);
        }
        let end = (self.cursor + max).min(records.len());
        let range = self.cursor..end;
        self.cursor = end;
        Ok(Some(RecordChunk {
            event_id: records.event_id[range.clone()].to_vec(),
            tof: records.tof[range.clone()].to_vec(),
            pulse_index: records.pulse_index[range.clone()].to_vec(),
            weight: records.weight.as_ref().map(|w| w[range].to_vec()),
        }))
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

/// Run logs held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRunLog {
    pub period_log: Option<PeriodLog>,
    pub declared_periods: Option<usize>,
    pub pulse_times: Option<PulseTimeIndex>,
}

impl MemoryRunLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the period log from `(nanoseconds, period)` pairs and the declared count.
    #[must_use]
    pub fn with_periods(mut self, declared: usize, entries: &[(i64, u32)]) -> Self {
        self.declared_periods = Some(declared);
        self.period_log = Some(PeriodLog::new(
            entries.iter().map(|&(t, p)| (PulseTime(t), p)).collect(),
        ));
        self
    }

    #[must_use]
    pub fn with_pulse_times(mut self, pulse_times: PulseTimeIndex) -> Self {
        self.pulse_times = Some(pulse_times);
        self
    }
}

impl RunLogSource for MemoryRunLog {
    fn period_log(&self) -> Result<Option<PeriodLog>> {
        Ok(self.period_log.clone())
    }

    fn declared_periods(&self) -> Result<Option<usize>> {
        Ok(self.declared_periods)
    }

    fn pulse_times(&self) -> Result<Option<PulseTimeIndex>> {
        Ok(self.pulse_times.clone())
    }
}
