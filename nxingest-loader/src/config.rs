//! Loader configuration.
//!
//! Every field has a default, so a partial JSON document is accepted:
//!
//! ```json
//! { "dispatch": "threads", "workers": 8, "tof_window": { "min": 1000.0, "max": 5000.0 } }
//! ```

use crate::filter::{EventFilter, TimeWindow, TofWindow};
use crate::{Error, Result};
use nxingest_core::{BinEdges, Event, SortOrder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::mem::size_of;
use std::path::Path;
use sysinfo::System;

const MEMORY_OVERHEAD_FACTOR: f64 = 1.5;
const MIN_CHUNK_EVENTS: usize = 4_096;
const MAX_CHUNK_EVENTS: usize = 1 << 24;

/// How bank work is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    /// All banks on the calling thread.
    Sequential,
    /// A bounded rayon pool.
    #[default]
    Threads,
    /// One worker process per bank, merged at the join barrier.
    Processes,
}

/// Configuration for one load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub dispatch: DispatchKind,
    /// Worker count; `None` uses the available parallelism.
    pub workers: Option<usize>,
    pub tof_window: Option<TofWindow>,
    pub time_window: Option<TimeWindow>,
    /// Count events per channel and reserve storage before appending.
    pub precount: bool,
    /// Order applied to every channel after the join barrier.
    pub sort_order: SortOrder,
    /// Records per read; `None` derives it from `memory_fraction`.
    pub chunk_events: Option<usize>,
    /// Fraction of available memory shared by all workers' read buffers.
    pub memory_fraction: f64,
    /// Edges set on every period; `None` spans the observed TOF range.
    pub bin_edges: Option<BinEdges>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchKind::Threads,
            workers: None,
            tof_window: None,
            time_window: None,
            precount: false,
            sort_order: SortOrder::PulseTimeTof,
            chunk_events: None,
            memory_fraction: 0.25,
            bin_edges: None,
        }
    }
}

impl LoaderConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.chunk_events == Some(0) {
            return Err(Error::Config("chunk_events must be at least 1".to_string()));
        }
        if let Some(window) = self.tof_window {
            if !window.is_valid() {
                return Err(Error::Config(format!(
                    "tof_window [{}, {}] is empty or not finite",
                    window.min, window.max
                )));
            }
        }
        if let Some(window) = self.time_window {
            if window.start > window.stop {
                return Err(Error::Config(format!(
                    "time_window starts at {} after it stops at {}",
                    window.start.as_nanos(),
                    window.stop.as_nanos()
                )));
            }
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::Config(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchKind) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the worker count.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_workers`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// Fallible variant of [`Self::with_workers`].
    ///
    /// # Errors
    /// Returns an error if `workers` is 0.
    pub fn try_with_workers(mut self, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        self.workers = Some(workers);
        Ok(self)
    }

    /// Keeps only events with `min <= tof <= max` (µs).
    #[must_use]
    pub fn with_tof_window(mut self, min: f64, max: f64) -> Self {
        self.tof_window = Some(TofWindow::new(min, max));
        self
    }

    /// Fallible variant of [`Self::with_tof_window`].
    ///
    /// # Errors
    /// Returns an error if the window is empty or not finite.
    pub fn try_with_tof_window(mut self, min: f64, max: f64) -> Result<Self> {
        let window = TofWindow::new(min, max);
        if !window.is_valid() {
            return Err(Error::Config(format!(
                "tof_window [{min}, {max}] is empty or not finite"
            )));
        }
        self.tof_window = Some(window);
        Ok(self)
    }

    /// Keeps only events whose pulse time lies in the window.
    #[must_use]
    pub fn with_time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    #[must_use]
    pub fn with_precount(mut self, enabled: bool) -> Self {
        self.precount = enabled;
        self
    }

    #[must_use]
    pub fn with_sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = order;
        self
    }

    /// Sets the records read per chunk.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_chunk_events`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_chunk_events(mut self, events: usize) -> Self {
        self.chunk_events = Some(events.max(1));
        self
    }

    /// Fallible variant of [`Self::with_chunk_events`].
    ///
    /// # Errors
    /// Returns an error if `events` is 0.
    pub fn try_with_chunk_events(mut self, events: usize) -> Result<Self> {
        if events == 0 {
            return Err(Error::Config("chunk_events must be at least 1".to_string()));
        }
        self.chunk_events = Some(events);
        Ok(self)
    }

    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_bin_edges(mut self, edges: BinEdges) -> Self {
        self.bin_edges = Some(edges);
        self
    }

    /// The filters handed to every worker.
    #[must_use]
    pub fn filter(&self) -> EventFilter {
        EventFilter::new(self.tof_window, self.time_window)
    }

    /// Configured worker count, or the machine's available parallelism.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        self.workers
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, usize::from))
            .max(1)
    }

    /// Records per read for each worker.
    ///
    /// Without an explicit `chunk_events`, the budget is `memory_fraction` of
    /// available memory split across the workers.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is invalid or system memory cannot be queried.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_chunk_events(&self) -> Result<usize> {
        if let Some(events) = self.chunk_events {
            return Ok(events.max(1));
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::Config(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::Config(
                "available system memory reported as 0".to_string(),
            ));
        }
        let budget = available as f64 * self.memory_fraction / self.effective_workers() as f64;
        let per_event = size_of::<Event>() as f64 * MEMORY_OVERHEAD_FACTOR;
        let events = (budget / per_event).floor() as usize;
        Ok(events.clamp(MIN_CHUNK_EVENTS, MAX_CHUNK_EVENTS))
    }
}
