//! HDF5/NeXus event files (`NXevent_data`).
//!
//! Layout read and written here:
//!
//! ```text
//! /entry                                  NXentry
//!   /<bank>_events                        NXevent_data
//!     event_id            [n]   u32
//!     event_time_offset   [n]   f64, microseconds
//!     event_weight        [n]   f32 (optional)
//!     event_time_zero     [p]   i64 ns or f64 s since epoch (optional)
//!     event_index         [p]   u64, first event of each pulse (optional)
//!   /DASlogs/period_log/{time, value}
//!   /DASlogs/proton_charge/time
//!   /periods/number
//! ```

use crate::memory::MemoryBank;
use crate::source::{BankReader, EventSource, RecordChunk, RunLogSource};
use crate::{Error, Result};
use hdf5::types::{H5Type, TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{s, ArrayView1};
use nxingest_core::{DetectorId, PeriodLog, PulseTime, PulseTimeIndex};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const ENTRY: &str = "entry";
const EVENTS_SUFFIX: &str = "_events";
const DAS_LOGS: &str = "DASlogs";

/// A NeXus event file. Each bank is opened with its own file handle.
#[derive(Debug, Clone)]
pub struct NexusEventFile {
    path: PathBuf,
}

impl NexusEventFile {
    /// Opens `path` and checks that it has an `/entry` group.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or has no entry.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        file.group(ENTRY).map_err(|_| {
            Error::InvalidFormat(format!("{} has no /{ENTRY} group", path.display()))
        })?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_entry(&self) -> Result<(File, Group)> {
        let file = File::open(&self.path)?;
        let entry = file.group(ENTRY)?;
        Ok((file, entry))
    }
}

fn das_log(entry: &Group, name: &str) -> Option<Group> {
    entry.group(DAS_LOGS).and_then(|logs| logs.group(name)).ok()
}

impl EventSource for NexusEventFile {
    fn bank_names(&self) -> Result<Vec<String>> {
        let (_file, entry) = self.open_entry()?;
        let mut names = Vec::new();
        for member in entry.member_names()? {
            if let Some(bank) = member.strip_suffix(EVENTS_SUFFIX) {
                if entry.group(&member).is_ok() {
                    names.push(bank.to_string());
                }
            }
        }
        Ok(names)
    }

    fn open_bank(&self, name: &str) -> Result<Box<dyn BankReader + '_>> {
        let file = File::open(&self.path)?;
        let group = file
            .group(ENTRY)?
            .group(&format!("{name}{EVENTS_SUFFIX}"))
            .map_err(|_| Error::MissingBank(name.to_string()))?;
        Ok(Box::new(NexusBankReader::new(file, &group, name)?))
    }
}

impl RunLogSource for NexusEventFile {
    fn period_log(&self) -> Result<Option<PeriodLog>> {
        let (_file, entry) = self.open_entry()?;
        let Some(group) = das_log(&entry, "period_log") else {
            return Ok(None);
        };
        let times = read_time_column(&group.dataset("time")?)?;
        let values = read_dataset_vec::<u32>(&group, "value")?;
        if times.len() != values.len() {
            return Err(Error::InvalidFormat(format!(
                "period_log has {} times but {} values",
                times.len(),
                values.len()
            )));
        }
        Ok(Some(PeriodLog::new(times.into_iter().zip(values).collect())))
    }

    fn declared_periods(&self) -> Result<Option<usize>> {
        let (_file, entry) = self.open_entry()?;
        let Ok(number) = entry.group("periods").and_then(|g| g.dataset("number")) else {
            return Ok(None);
        };
        Ok(number.read_raw::<u32>()?.first().map(|&n| n as usize))
    }

    fn pulse_times(&self) -> Result<Option<PulseTimeIndex>> {
        let (_file, entry) = self.open_entry()?;
        let Some(group) = das_log(&entry, "proton_charge") else {
            return Ok(None);
        };
        let times = read_time_column(&group.dataset("time")?)?;
        Ok(Some(PulseTimeIndex::new(times)?))
    }
}

/// Chunked reader over one `NXevent_data` group.
pub struct NexusBankReader {
    _file: File,
    name: String,
    event_id: Dataset,
    tof: Dataset,
    weight: Option<Dataset>,
    len: usize,
    event_index: Vec<u64>,
    pulse_times: Option<PulseTimeIndex>,
    cursor: usize,
    pulse_cursor: usize,
}

impl NexusBankReader {
    fn new(file: File, group: &Group, name: &str) -> Result<Self> {
        let event_id = group.dataset("event_id")?;
        let tof = group.dataset("event_time_offset")?;
        let weight = group.dataset("event_weight").ok();
        let len = event_id.size();

        if tof.size() != len {
            return Err(Error::corrupted(
                name,
                format!("event_time_offset has {} entries, event_id {len}", tof.size()),
            ));
        }
        if let Some(w) = &weight {
            if w.size() != len {
                return Err(Error::corrupted(
                    name,
                    format!("event_weight has {} entries, event_id {len}", w.size()),
                ));
            }
        }

        let event_index = read_dataset_vec_opt::<u64>(group, "event_index")?.unwrap_or_default();
        if let Some(i) = event_index.windows(2).position(|w| w[1] < w[0]) {
            return Err(Error::corrupted(
                name,
                format!("event_index decreases at pulse {}", i + 1),
            ));
        }
        if event_index.last().is_some_and(|&last| last > len as u64) {
            return Err(Error::corrupted(name, "event_index points past the last event"));
        }

        let pulse_times = match group.dataset("event_time_zero") {
            Ok(ds) => Some(PulseTimeIndex::new(read_time_column(&ds)?)?),
            Err(_) => None,
        };
        if let Some(pulses) = &pulse_times {
            if !event_index.is_empty() && pulses.len() != event_index.len() {
                return Err(Error::corrupted(
                    name,
                    format!(
                        "event_time_zero has {} pulses, event_index {}",
                        pulses.len(),
                        event_index.len()
                    ),
                ));
            }
        }

        log::debug!(
            "opened bank '{name}': {len} events, {} pulses",
            event_index.len()
        );
        Ok(Self {
            _file: file,
            name: name.to_string(),
            event_id,
            tof,
            weight,
            len,
            event_index,
            pulse_times,
            cursor: 0,
            pulse_cursor: 0,
        })
    }

    fn pulse_of(&mut self, event: usize) -> Result<u32> {
        let event = event as u64;
        while self.pulse_cursor + 1 < self.event_index.len()
            && self.event_index[self.pulse_cursor + 1] <= event
        {
            self.pulse_cursor += 1;
        }
        u32::try_from(self.pulse_cursor)
            .map_err(|_| Error::corrupted(&self.name, "pulse count exceeds u32 range"))
    }
}

impl BankReader for NexusBankReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.len
    }

    fn first_event_id(&mut self) -> Result<Option<DetectorId>> {
        if self.len == 0 {
            return Ok(None);
        }
        let first = self.event_id.read_slice_1d::<DetectorId, _>(s![0..1])?;
        Ok(first.first().copied())
    }

    fn pulse_times(&self) -> Option<&PulseTimeIndex> {
        self.pulse_times.as_ref()
    }

    fn is_sorted_by_pulse(&self) -> bool {
        // Pulse indices are derived from a monotonic event_index.
        true
    }

    fn read_chunk(&mut self, max: usize) -> Result<Option<RecordChunk>> {
        if self.cursor >= self.len || max == 0 {
            return Ok(None);
        }
        let start = self.cursor;
        let end = (start + max).min(self.len);

        let event_id = self
            .event_id
            .read_slice_1d::<DetectorId, _>(s![start..end])?
            .to_vec();
        let tof = self.tof.read_slice_1d::<f64, _>(s![start..end])?.to_vec();
        let weight = match &self.weight {
            Some(ds) => Some(ds.read_slice_1d::<f32, _>(s![start..end])?.to_vec()),
            None => None,
        };
        let mut pulse_index = Vec::with_capacity(end - start);
        for k in start..end {
            pulse_index.push(self.pulse_of(k)?);
        }
        self.cursor = end;

        let chunk = RecordChunk {
            event_id,
            tof,
            pulse_index,
            weight,
        };
        chunk.validate(&self.name)?;
        Ok(Some(chunk))
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        self.pulse_cursor = 0;
        Ok(())
    }
}

/// Writes NeXus event files in the layout [`NexusEventFile`] reads.
pub struct NexusWriter {
    _file: File,
    entry: Group,
    chunk_events: usize,
}

impl NexusWriter {
    /// Creates (truncates) `path` with an empty `/entry`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        set_attr_str_file(&file, "nxingest_format_version", "0.1")?;
        let entry = file.create_group(ENTRY)?;
        set_attr_str_group(&entry, "NX_class", "NXentry")?;
        Ok(Self {
            _file: file,
            entry,
            chunk_events: 100_000,
        })
    }

    /// Sets the HDF5 chunk length of event columns.
    #[must_use]
    pub fn with_chunk_events(mut self, chunk_events: usize) -> Self {
        self.chunk_events = chunk_events.max(1);
        self
    }

    /// Writes one bank as `/entry/<name>_events`.
    ///
    /// # Errors
    /// Returns an error if the records are not pulse-ordered, reference a
    /// pulse outside the bank's pulse table, or HDF5 I/O fails.
    pub fn write_bank(&self, bank: &MemoryBank) -> Result<()> {
        let records = &bank.records;
        records.validate(&bank.name)?;
        if records.pulse_index.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::InvalidFormat(format!(
                "bank '{}' records must be pulse-ordered",
                bank.name
            )));
        }
        let max_pulse = records.pulse_index.last().map_or(0, |&p| p as usize + 1);
        let n_pulses = match &bank.pulse_times {
            Some(pulses) if max_pulse > pulses.len() => {
                return Err(Error::InvalidFormat(format!(
                    "bank '{}' references pulse {} of {}",
                    bank.name,
                    max_pulse - 1,
                    pulses.len()
                )));
            }
            Some(pulses) => pulses.len(),
            None => max_pulse,
        };

        let group = self
            .entry
            .create_group(&format!("{}{EVENTS_SUFFIX}", bank.name))?;
        set_attr_str_group(&group, "NX_class", "NXevent_data")?;

        self.write_column(&group, "event_id", &records.event_id)?;
        let tof = self.write_column(&group, "event_time_offset", &records.tof)?;
        set_dataset_units(&tof, "microsecond")?;
        if let Some(weight) = &records.weight {
            self.write_column(&group, "event_weight", weight)?;
        }

        let event_index: Vec<u64> = (0..n_pulses)
            .map(|p| records.pulse_index.partition_point(|&i| (i as usize) < p) as u64)
            .collect();
        self.write_column(&group, "event_index", &event_index)?;
        if let Some(pulses) = &bank.pulse_times {
            let ns: Vec<i64> = pulses.as_slice().iter().map(PulseTime::as_nanos).collect();
            let etz = self.write_column(&group, "event_time_zero", &ns)?;
            set_dataset_units(&etz, "nanosecond")?;
        }
        Ok(())
    }

    /// Writes `/entry/DASlogs/period_log`.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails.
    pub fn write_period_log(&self, log: &PeriodLog) -> Result<()> {
        let group = self.das_logs()?.create_group("period_log")?;
        let times: Vec<i64> = log.entries().iter().map(|(t, _)| t.as_nanos()).collect();
        let values: Vec<u32> = log.entries().iter().map(|&(_, p)| p).collect();
        self.write_column(&group, "time", &times)?;
        self.write_column(&group, "value", &values)?;
        Ok(())
    }

    /// Writes `/entry/periods/number`.
    ///
    /// # Errors
    /// Returns an error if `n` does not fit in u32 or HDF5 I/O fails.
    pub fn write_declared_periods(&self, n: usize) -> Result<()> {
        let n = u32::try_from(n)
            .map_err(|_| Error::InvalidFormat(format!("period count {n} exceeds u32 range")))?;
        let group = self.entry.create_group("periods")?;
        self.write_column(&group, "number", &[n])?;
        Ok(())
    }

    /// Writes `/entry/DASlogs/proton_charge/time`.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails.
    pub fn write_pulse_times(&self, pulses: &PulseTimeIndex) -> Result<()> {
        let group = self.das_logs()?.create_group("proton_charge")?;
        let ns: Vec<i64> = pulses.as_slice().iter().map(PulseTime::as_nanos).collect();
        self.write_column(&group, "time", &ns)?;
        Ok(())
    }

    fn das_logs(&self) -> Result<Group> {
        match self.entry.group(DAS_LOGS) {
            Ok(group) => Ok(group),
            Err(_) => {
                let group = self.entry.create_group(DAS_LOGS)?;
                set_attr_str_group(&group, "NX_class", "IXselog")?;
                Ok(group)
            }
        }
    }

    fn write_column<T: H5Type>(&self, group: &Group, name: &str, data: &[T]) -> Result<Dataset> {
        let dataset = create_extendable_dataset::<T>(group, name, self.chunk_events)?;
        append_slice(&dataset, 0, data)?;
        Ok(dataset)
    }
}

fn read_time_column(dataset: &Dataset) -> Result<Vec<PulseTime>> {
    match dataset.dtype()?.to_descriptor()? {
        TypeDescriptor::Float(_) => Ok(dataset
            .read_raw::<f64>()?
            .into_iter()
            .map(PulseTime::from_seconds)
            .collect()),
        _ => Ok(dataset
            .read_raw::<i64>()?
            .into_iter()
            .map(PulseTime::from_nanos)
            .collect()),
    }
}

fn create_extendable_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    chunk_events: usize,
) -> Result<Dataset> {
    Ok(group
        .new_dataset::<T>()
        .shape((0..,))
        .chunk((chunk_events,))
        .create(name)?)
}

fn append_slice<T: H5Type>(dataset: &Dataset, offset: usize, data: &[T]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let new_len = offset + data.len();
    dataset.resize((new_len,))?;
    let view = ArrayView1::from(data);
    dataset.write_slice(view, s![offset..new_len])?;
    Ok(())
}

fn read_dataset_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
    let dataset = group.dataset(name)?;
    Ok(dataset.read_raw::<T>()?)
}

fn read_dataset_vec_opt<T: H5Type>(group: &Group, name: &str) -> Result<Option<Vec<T>>> {
    match group.dataset(name) {
        Ok(dataset) => Ok(Some(dataset.read_raw::<T>()?)),
        Err(_) => Ok(None),
    }
}

fn set_dataset_units(dataset: &Dataset, units: &str) -> Result<()> {
    let value = to_var_len_unicode(units)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create("units")?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn pulses(ns: &[i64]) -> PulseTimeIndex {
        PulseTimeIndex::new(ns.iter().copied().map(PulseTime).collect()).unwrap()
    }

    fn fixture() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let writer = NexusWriter::create(file.path())
            .unwrap()
            .with_chunk_events(4);
        // Pulse 1 is empty.
        let bank1 = MemoryBank::new("bank1")
            .with_events(&[(100, 10.0, 0), (101, 20.0, 0), (102, 30.0, 2), (100, 40.0, 2)])
            .with_pulse_times(pulses(&[1_000, 2_000, 3_000]));
        let mut bank2 = MemoryBank::new("bank2");
        bank2.push_weighted(200, 5.0, 0, 2.0);
        writer.write_bank(&bank1).unwrap();
        writer.write_bank(&bank2).unwrap();
        writer
            .write_period_log(&PeriodLog::new(vec![(PulseTime(0), 1), (PulseTime(2_500), 2)]))
            .unwrap();
        writer.write_declared_periods(2).unwrap();
        writer.write_pulse_times(&pulses(&[1_000, 2_000, 3_000])).unwrap();
        file
    }

    #[test]
    fn test_bank_names_and_reading() {
        let file = fixture();
        let nexus = NexusEventFile::open(file.path()).unwrap();
        let mut names = nexus.bank_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["bank1", "bank2"]);

        let mut reader = nexus.open_bank("bank1").unwrap();
        assert_eq!(reader.len(), 4);
        assert_eq!(reader.first_event_id().unwrap(), Some(100));
        assert_eq!(reader.pulse_times().unwrap().get(2), Some(PulseTime(3_000)));

        let first = reader.read_chunk(3).unwrap().unwrap();
        assert_eq!(first.event_id, vec![100, 101, 102]);
        assert_eq!(first.pulse_index, vec![0, 0, 2]);
        assert!(first.weight.is_none());
        let rest = reader.read_chunk(3).unwrap().unwrap();
        assert_eq!(rest.pulse_index, vec![2]);
        assert!(reader.read_chunk(3).unwrap().is_none());

        reader.rewind().unwrap();
        assert_eq!(reader.read_chunk(10).unwrap().unwrap().pulse_index, vec![0, 0, 2, 2]);
    }

    #[test]
    fn test_weights_and_missing_bank() {
        let file = fixture();
        let nexus = NexusEventFile::open(file.path()).unwrap();
        let mut reader = nexus.open_bank("bank2").unwrap();
        assert!(reader.pulse_times().is_none());
        let chunk = reader.read_chunk(10).unwrap().unwrap();
        assert_eq!(chunk.weight, Some(vec![2.0]));
        assert!(matches!(
            nexus.open_bank("bank3").err(),
            Some(Error::MissingBank(_))
        ));
    }

    #[test]
    fn test_run_logs() {
        let file = fixture();
        let nexus = NexusEventFile::open(file.path()).unwrap();
        assert_eq!(nexus.declared_periods().unwrap(), Some(2));
        let log = nexus.period_log().unwrap().unwrap();
        assert_eq!(log.entries(), &[(PulseTime(0), 1), (PulseTime(2_500), 2)]);
        assert_eq!(nexus.pulse_times().unwrap().unwrap().len(), 3);
    }

    #[test]
    fn test_absent_logs() {
        let file = NamedTempFile::new().unwrap();
        NexusWriter::create(file.path()).unwrap();
        let nexus = NexusEventFile::open(file.path()).unwrap();
        assert!(nexus.period_log().unwrap().is_none());
        assert!(nexus.declared_periods().unwrap().is_none());
        assert!(nexus.pulse_times().unwrap().is_none());
        assert!(nexus.bank_names().unwrap().is_empty());
    }

    #[test]
    fn test_decreasing_event_index_is_corruption() {
        let file = NamedTempFile::new().unwrap();
        let writer = NexusWriter::create(file.path()).unwrap();
        let group = writer.entry.create_group("bad_events").unwrap();
        writer.write_column(&group, "event_id", &[1u32, 2, 3]).unwrap();
        writer
            .write_column(&group, "event_time_offset", &[1.0f64, 2.0, 3.0])
            .unwrap();
        writer.write_column(&group, "event_index", &[0u64, 2, 1]).unwrap();
        drop(writer);

        let nexus = NexusEventFile::open(file.path()).unwrap();
        let err = nexus.open_bank("bad").err().unwrap();
        assert!(matches!(err, Error::CorruptedBank { ref bank, .. } if bank == "bad"));
    }

    #[test]
    fn test_unordered_bank_rejected_by_writer() {
        let file = NamedTempFile::new().unwrap();
        let writer = NexusWriter::create(file.path()).unwrap();
        let bank = MemoryBank::new("b").with_events(&[(1, 1.0, 1), (1, 1.0, 0)]);
        assert!(writer.write_bank(&bank).is_err());
    }
}
