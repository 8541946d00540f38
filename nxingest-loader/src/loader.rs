//! Fork/join loading of every bank of a source into a workspace collection.

use crate::config::{DispatchKind, LoaderConfig};
use crate::dispatch::{BankJob, Dispatch, JobOutput, WorkerLauncher};
use crate::offset::{confirm_offset, resolve_bank_offset, BankRouting};
use crate::report::{BankIngestionReport, LoadReport};
use crate::sink::{split_disjoint, EventSink, LockedStores, SliceSink};
use crate::worker::{ingest_bank, precount_bank, IngestContext};
use crate::{Error, Result};
use nxingest_core::{
    split_by_period, BinEdges, ChannelIndex, ChannelMapping, CombinedOutput, EventList,
    EventWorkspaceCollection, ExperimentMetadata, NormalizedPeriodLog, PeriodCorrupted,
    PulseTimeIndex,
};
use nxingest_io::{EventSource, RunLogSource};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How one bank will be ingested.
#[derive(Debug, Clone, PartialEq)]
struct BankPlan {
    name: String,
    routing: BankRouting,
    /// Channels the bank writes, when its geometry is known.
    span: Option<Range<ChannelIndex>>,
}

/// Banks sharing one worker; `span` is `None` for banks that store nothing.
#[derive(Debug, Clone, PartialEq)]
struct Task {
    span: Option<Range<ChannelIndex>>,
    banks: Vec<usize>,
}

/// Groups banks into tasks with pairwise disjoint channel spans.
///
/// Returns `None` if a mapped bank has no known span.
fn plan_tasks(plans: &[BankPlan]) -> Option<Vec<Task>> {
    let mut spanned: Vec<(Range<ChannelIndex>, usize)> = Vec::new();
    let mut idle = Vec::new();
    for (i, plan) in plans.iter().enumerate() {
        match (&plan.routing, &plan.span) {
            (BankRouting::Unmapped, _) => idle.push(i),
            (BankRouting::Offset(_) | BankRouting::Lookup, Some(span)) => {
                spanned.push((span.clone(), i));
            }
            (BankRouting::Offset(_) | BankRouting::Lookup, None) => return None,
        }
    }
    spanned.sort_by_key(|(span, i)| (span.start, span.end, *i));

    let mut tasks: Vec<Task> = Vec::new();
    for (span, i) in spanned {
        match tasks.last_mut() {
            Some(Task {
                span: Some(current),
                banks,
            }) if span.start < current.end => {
                current.end = current.end.max(span.end);
                banks.push(i);
            }
            _ => tasks.push(Task {
                span: Some(span),
                banks: vec![i],
            }),
        }
    }
    tasks.extend(idle.into_iter().map(|i| Task {
        span: None,
        banks: vec![i],
    }));
    Some(tasks)
}

/// Runs `f` over `items`, in parallel on the current rayon pool if asked.
fn run_each<T, R, F>(parallel: bool, items: Vec<T>, f: F) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R> + Sync + Send,
{
    if parallel {
        items.into_par_iter().map(f).collect()
    } else {
        items.into_iter().map(f).collect()
    }
}

/// A finished load.
#[derive(Debug)]
pub struct LoadResult {
    /// Finalized collection.
    pub collection: EventWorkspaceCollection,
    pub report: LoadReport,
}

impl LoadResult {
    /// Collapses the collection into its single workspace or period group.
    ///
    /// # Errors
    /// Propagates the collection's state error.
    pub fn into_output(self) -> Result<CombinedOutput> {
        Ok(self.collection.combined_workspace()?)
    }
}

/// Loads all banks of an [`EventSource`] into an [`EventWorkspaceCollection`].
///
/// The algorithm is the same for every [`Dispatch`]:
///
/// 1. resolve the period count from the run log,
/// 2. derive each bank's offset (or per-event lookup) and channel span,
/// 3. ingest banks concurrently (disjoint slices, or per-channel locks when
///    spans are unknown, or launched jobs merged afterwards),
/// 4. join, sort and set bin edges.
pub struct EventLoader<'a> {
    source: &'a dyn EventSource,
    run_log: Option<&'a dyn RunLogSource>,
    mapping: Arc<ChannelMapping>,
    metadata: Arc<ExperimentMetadata>,
    config: LoaderConfig,
    cancel: Arc<AtomicBool>,
}

impl<'a> EventLoader<'a> {
    #[must_use]
    pub fn new(
        source: &'a dyn EventSource,
        mapping: Arc<ChannelMapping>,
        metadata: Arc<ExperimentMetadata>,
    ) -> Self {
        Self {
            source,
            run_log: None,
            mapping,
            metadata,
            config: LoaderConfig::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reads the period log and pulse table from `run_log`.
    #[must_use]
    pub fn with_run_log(mut self, run_log: &'a dyn RunLogSource) -> Self {
        self.run_log = Some(run_log);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `flag` for cancellation; setting it makes the load return [`Error::Cancelled`].
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Flag polled between banks.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Loads with the dispatch named in the configuration.
    ///
    /// # Errors
    /// [`Error::Config`] for [`DispatchKind::Processes`], which needs a
    /// launcher (see [`Self::load_with`]); otherwise as [`Self::load_with`].
    pub fn load(&self) -> Result<LoadResult> {
        let dispatch = match self.config.dispatch {
            DispatchKind::Sequential => Dispatch::Sequential,
            DispatchKind::Threads => Dispatch::Threads {
                workers: self.config.effective_workers(),
            },
            DispatchKind::Processes => {
                return Err(Error::Config(
                    "process dispatch needs a worker launcher".to_string(),
                ))
            }
        };
        self.load_with(dispatch)
    }

    /// Loads every bank using `dispatch`.
    ///
    /// # Errors
    /// [`Error::MissingChannelMapping`] for an empty mapping, fatal period-log
    /// corruption, record corruption in any bank, missing pulse times,
    /// [`Error::Cancelled`] if the cancel flag is set before the load returns.
    pub fn load_with(&self, dispatch: Dispatch<'_>) -> Result<LoadResult> {
        if self.mapping.is_empty() {
            return Err(Error::MissingChannelMapping);
        }
        self.config.validate()?;
        self.check_cancel()?;

        let (periods, period_warning) = self.resolve_periods()?;
        let run_pulses = self.run_pulses()?;
        let plans = self.plan_banks()?;
        let chunk_events = self.config.resolve_chunk_events()?;

        let mut collection = EventWorkspaceCollection::new(Arc::clone(&self.metadata));
        collection.pad_from_mapping(&self.mapping)?;
        collection.set_n_periods(periods.n_periods(), &periods)?;
        if self.config.precount && !matches!(dispatch, Dispatch::Processes(_)) {
            self.precount(&plans, chunk_events, &mut collection)?;
        }

        let filter = self.config.filter();
        let ctx = IngestContext {
            lookup: self.mapping.detector_lookup(),
            filter: &filter,
            periods: &periods,
            run_pulses: run_pulses.as_ref(),
            chunk_events,
        };
        log::info!(
            "ingesting {} banks into {} channels x {} period(s) ({dispatch:?})",
            plans.len(),
            collection.n_channels(),
            periods.n_periods()
        );
        let mut reports = collection.ingest(|targets| match dispatch {
            Dispatch::Sequential => self.run_in_place(false, &plans, targets, &ctx),
            Dispatch::Threads { workers } => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(workers.max(1))
                    .build()
                    .map_err(|e| Error::Worker(e.to_string()))?;
                pool.install(|| self.run_in_place(true, &plans, targets, &ctx))
            }
            Dispatch::Processes(launcher) => self.run_launched(launcher, &plans, targets, &ctx),
        })?;
        self.check_cancel()?;

        reports.sort_by_key(|(index, _)| *index);
        let report = LoadReport {
            banks: reports.into_iter().map(|(_, report)| report).collect(),
            n_periods: periods.n_periods(),
            period_warning,
        };
        debug_assert!(report.is_conserved());
        self.finalize(&mut collection, &report)?;
        report.log_summary();
        Ok(LoadResult { collection, report })
    }

    /// Normalized period log plus the recovered mismatch, if any.
    fn resolve_periods(&self) -> Result<(NormalizedPeriodLog, Option<PeriodCorrupted>)> {
        let Some(run_log) = self.run_log else {
            return Ok((NormalizedPeriodLog::single(), None));
        };
        let declared = run_log.declared_periods()?;
        let Some(period_log) = run_log.period_log()? else {
            if let Some(n) = declared.filter(|&n| n > 1) {
                log::warn!("{n} periods declared but no period log; loading one period");
            }
            return Ok((NormalizedPeriodLog::single(), None));
        };
        let declared = declared.unwrap_or_else(|| {
            period_log
                .distinct_periods()
                .last()
                .and_then(|&max| usize::try_from(max).ok())
                .unwrap_or(1)
                .max(1)
        });

        match split_by_period(period_log.clone(), declared) {
            Ok(normalized) => Ok((normalized, None)),
            Err(err @ PeriodCorrupted::TooFewPeriods { observed, .. }) => {
                log::warn!("{err}; continuing with {observed} period(s)");
                let normalized = split_by_period(period_log, observed)?;
                Ok((normalized, Some(err)))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn run_pulses(&self) -> Result<Option<PulseTimeIndex>> {
        let pulses = match self.run_log {
            Some(run_log) => run_log.pulse_times()?,
            None => None,
        };
        if pulses.is_none() {
            log::debug!("no run-level pulse table; banks use their own event_time_zero");
        }
        Ok(pulses)
    }

    /// Offset and span per bank, in source order.
    fn plan_banks(&self) -> Result<Vec<BankPlan>> {
        let instrument = &self.metadata.instrument;
        self.source
            .bank_names()?
            .into_iter()
            .map(|name| -> Result<BankPlan> {
                let (routing, span) = match instrument.bank(&name) {
                    Some(geometry) => {
                        let ids = &geometry.detector_ids;
                        let sample = ids
                            .iter()
                            .copied()
                            .find(|&id| self.mapping.channel_of_detector(id).is_some())
                            .or_else(|| ids.first().copied());
                        let routing = resolve_bank_offset(&self.mapping, &name, sample);
                        let routing = confirm_offset(&self.mapping, &name, routing, ids);
                        (routing, self.mapping.channel_span(ids))
                    }
                    None => {
                        let sample = self.source.open_bank(&name)?.first_event_id()?;
                        if !instrument.banks.is_empty() {
                            log::warn!(
                                "bank '{name}' is not in the instrument geometry; \
                                 deriving its offset from first event id {sample:?}"
                            );
                        }
                        // Contiguity cannot be checked without geometry.
                        let routing = match resolve_bank_offset(&self.mapping, &name, sample) {
                            BankRouting::Offset(_) => BankRouting::Lookup,
                            other => other,
                        };
                        (routing, None)
                    }
                };
                Ok(BankPlan {
                    name,
                    routing,
                    span,
                })
            })
            .collect()
    }

    fn precount(
        &self,
        plans: &[BankPlan],
        chunk_events: usize,
        collection: &mut EventWorkspaceCollection,
    ) -> Result<()> {
        for plan in plans.iter().filter(|p| p.routing.is_mapped()) {
            self.check_cancel()?;
            let mut reader = self.source.open_bank(&plan.name)?;
            let counts = precount_bank(
                reader.as_mut(),
                plan.routing,
                self.mapping.detector_lookup(),
                chunk_events,
            )?;
            for (channel, count) in counts {
                collection.reserve_channel_capacity(channel, count)?;
            }
        }
        Ok(())
    }

    fn ingest_plan<S: EventSink>(
        &self,
        index: usize,
        plans: &[BankPlan],
        ctx: &IngestContext<'_>,
        sink: &mut S,
    ) -> Result<(usize, BankIngestionReport)> {
        self.check_cancel()?;
        let plan = &plans[index];
        let mut reader = self.source.open_bank(&plan.name)?;
        let report = ingest_bank(reader.as_mut(), plan.routing, ctx, sink)?;
        Ok((index, report))
    }

    /// Threads or the calling thread writing straight into `targets`.
    fn run_in_place(
        &self,
        parallel: bool,
        plans: &[BankPlan],
        mut targets: Vec<&mut [EventList]>,
        ctx: &IngestContext<'_>,
    ) -> Result<Vec<(usize, BankIngestionReport)>> {
        let Some(tasks) = plan_tasks(plans) else {
            log::info!("bank channel spans unknown; ingesting through per-channel locks");
            let locked = LockedStores::take(&mut targets);
            let result = run_each(parallel, (0..plans.len()).collect(), |index| {
                self.ingest_plan(index, plans, ctx, &mut locked.sink())
            });
            locked.restore(&mut targets);
            return result;
        };

        log::debug!("{} banks in {} disjoint tasks", plans.len(), tasks.len());
        let spans: Vec<Range<ChannelIndex>> =
            tasks.iter().filter_map(|task| task.span.clone()).collect();
        let mut sinks = split_disjoint(targets, &spans).into_iter();
        let work: Vec<(Vec<usize>, SliceSink<'_>)> = tasks
            .into_iter()
            .map(|task| {
                let sink = task
                    .span
                    .and_then(|_| sinks.next())
                    .unwrap_or_else(|| SliceSink::new(0, Vec::new()));
                (task.banks, sink)
            })
            .collect();

        let per_task = run_each(parallel, work, |(banks, mut sink)| {
            banks
                .into_iter()
                .map(|index| self.ingest_plan(index, plans, ctx, &mut sink))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(per_task.into_iter().flatten().collect())
    }

    /// One launched job per bank, merged sequentially at the join barrier.
    fn run_launched(
        &self,
        launcher: &dyn WorkerLauncher,
        plans: &[BankPlan],
        mut targets: Vec<&mut [EventList]>,
        ctx: &IngestContext<'_>,
    ) -> Result<Vec<(usize, BankIngestionReport)>> {
        let n_channels = targets.first().map_or(0, |t| t.len());
        let jobs: Vec<BankJob> = plans
            .iter()
            .map(|plan| {
                let channels = match plan.routing {
                    BankRouting::Offset(_) | BankRouting::Lookup => {
                        plan.span.clone().unwrap_or(0..n_channels)
                    }
                    BankRouting::Unmapped => 0..0,
                };
                BankJob {
                    bank: plan.name.clone(),
                    routing: plan.routing,
                    lookup: ctx.lookup.restricted_to(&channels),
                    channels,
                    filter: *ctx.filter,
                    periods: ctx.periods.clone(),
                    run_pulses: ctx.run_pulses.cloned(),
                    chunk_events: ctx.chunk_events,
                }
            })
            .collect();

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.effective_workers())
            .build()
            .map_err(|e| Error::Worker(e.to_string()))?;
        let outputs: Vec<JobOutput> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    self.check_cancel()?;
                    launcher.launch(job)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut reports = Vec::with_capacity(outputs.len());
        for (index, output) in outputs.into_iter().enumerate() {
            self.check_cancel()?;
            output.partial.merge_into(&mut targets)?;
            reports.push((index, output.report));
        }
        Ok(reports)
    }

    /// Sorts every channel and sets bin edges on every period.
    fn finalize(&self, collection: &mut EventWorkspaceCollection, report: &LoadReport) -> Result<()> {
        collection.sort_all(self.config.sort_order)?;
        let edges = match &self.config.bin_edges {
            Some(edges) => edges.clone(),
            None => default_bin_edges(report.tof_range())?,
        };
        collection.set_all_bin_edges(&edges)?;
        Ok(())
    }
}

/// `[shortest - 1, longest + 1]`, or `[0, 1]` when nothing was kept.
fn default_bin_edges(tof_range: Option<(f64, f64)>) -> Result<BinEdges> {
    let edges = match tof_range {
        Some((shortest, longest)) if shortest.is_finite() && longest.is_finite() => {
            vec![shortest - 1.0, longest + 1.0]
        }
        _ => vec![0.0, 1.0],
    };
    Ok(BinEdges::new(edges)?)
}
