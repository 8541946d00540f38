//! Per-bank and per-load ingestion counters.

use nxingest_core::PeriodCorrupted;
use serde::{Deserialize, Serialize};

/// Counters returned by one bank's worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankIngestionReport {
    pub bank: String,
    pub events_read: u64,
    pub events_kept: u64,
    pub events_discarded_unmapped: u64,
    pub events_discarded_by_filter: u64,
    /// Kept events with a negative or implausibly large TOF.
    pub suspicious_tof: u64,
    pub shortest_tof: Option<f64>,
    pub longest_tof: Option<f64>,
    /// Kept events per period, indexed from 0.
    pub events_per_period: Vec<u64>,
}

impl BankIngestionReport {
    #[must_use]
    pub fn new(bank: impl Into<String>, n_periods: usize) -> Self {
        Self {
            bank: bank.into(),
            events_per_period: vec![0; n_periods],
            ..Self::default()
        }
    }

    pub(crate) fn record_kept(&mut self, period: usize, tof: f64) {
        self.events_kept += 1;
        if let Some(count) = self.events_per_period.get_mut(period) {
            *count += 1;
        }
        if tof.is_finite() {
            self.shortest_tof = Some(self.shortest_tof.map_or(tof, |t| t.min(tof)));
            self.longest_tof = Some(self.longest_tof.map_or(tof, |t| t.max(tof)));
        }
    }

    /// Every read event was either kept or discarded exactly once.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.events_kept + self.events_discarded_unmapped + self.events_discarded_by_filter
            == self.events_read
    }
}

/// Aggregate of all bank reports of one load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// One entry per bank, in source order.
    pub banks: Vec<BankIngestionReport>,
    pub n_periods: usize,
    /// Recovered period-log mismatch, if any.
    pub period_warning: Option<PeriodCorrupted>,
}

impl LoadReport {
    #[must_use]
    pub fn events_read(&self) -> u64 {
        self.banks.iter().map(|b| b.events_read).sum()
    }

    #[must_use]
    pub fn events_kept(&self) -> u64 {
        self.banks.iter().map(|b| b.events_kept).sum()
    }

    #[must_use]
    pub fn events_discarded_unmapped(&self) -> u64 {
        self.banks.iter().map(|b| b.events_discarded_unmapped).sum()
    }

    #[must_use]
    pub fn events_discarded_by_filter(&self) -> u64 {
        self.banks.iter().map(|b| b.events_discarded_by_filter).sum()
    }

    #[must_use]
    pub fn suspicious_tof(&self) -> u64 {
        self.banks.iter().map(|b| b.suspicious_tof).sum()
    }

    /// TOF range of kept events across all banks.
    #[must_use]
    pub fn tof_range(&self) -> Option<(f64, f64)> {
        let shortest = self.banks.iter().filter_map(|b| b.shortest_tof).reduce(f64::min)?;
        let longest = self.banks.iter().filter_map(|b| b.longest_tof).reduce(f64::max)?;
        Some((shortest, longest))
    }

    /// Kept events per period across all banks.
    #[must_use]
    pub fn events_per_period(&self) -> Vec<u64> {
        let mut totals = vec![0; self.n_periods];
        for bank in &self.banks {
            for (total, count) in totals.iter_mut().zip(&bank.events_per_period) {
                *total += count;
            }
        }
        totals
    }

    #[must_use]
    pub fn bank(&self, name: &str) -> Option<&BankIngestionReport> {
        self.banks.iter().find(|b| b.bank == name)
    }

    /// Kept plus discarded equals read, for every bank.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.banks.iter().all(BankIngestionReport::is_conserved)
    }

    /// Emits the end-of-load summary.
    pub fn log_summary(&self) {
        log::info!(
            "loaded {} of {} events from {} banks into {} period(s)",
            self.events_kept(),
            self.events_read(),
            self.banks.len(),
            self.n_periods
        );
        let unmapped = self.events_discarded_unmapped();
        if unmapped > 0 {
            let banks: Vec<&str> = self
                .banks
                .iter()
                .filter(|b| b.events_discarded_unmapped > 0)
                .map(|b| b.bank.as_str())
                .collect();
            log::warn!(
                "{unmapped} events with unmapped ids discarded (banks: {})",
                banks.join(", ")
            );
        }
        let filtered = self.events_discarded_by_filter();
        if filtered > 0 {
            log::info!("{filtered} events outside the filter windows discarded");
        }
        let suspicious = self.suspicious_tof();
        if suspicious > 0 {
            log::warn!("{suspicious} events kept with a negative or implausibly large TOF");
        }
        if let Some(warning) = &self.period_warning {
            log::warn!("period log: {warning}");
        }
    }
}
