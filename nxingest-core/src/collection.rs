//! Period-aware container for the channels of one load.
//!
//! [`EventWorkspaceCollection`] owns one [`PeriodMember`] per period and
//! presents a single read/write surface over them. Its lifecycle is checked at
//! runtime:
//!
//! ```text
//! Empty --set_n_periods--> Configured --begin_ingestion--> Ingesting
//!   |                                                         |
//!   +----------------begin_ingestion--------------------------+
//!                                                             |
//!                            Finalized <--finish_ingestion----+
//!                                |
//!                      combined_workspace (consumes)
//! ```

use crate::event_list::{BinEdges, ChannelData, EventList, SortOrder};
use crate::mapping::{ChannelMapping, DetectorId, SpectrumNumber};
use crate::metadata::{ExperimentMetadata, Instrument, MetadataView, PeriodOverrides, SampleShape};
use crate::period::NormalizedPeriodLog;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    /// One default member, period count not yet set.
    Empty,
    /// Period members created, no events yet.
    Configured,
    /// Channel stores are lent out to workers.
    Ingesting,
    /// All workers joined.
    Finalized,
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Configured => "configured",
            Self::Ingesting => "ingesting",
            Self::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Identity of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpectrumInfo {
    pub spectrum_number: SpectrumNumber,
    pub detector_ids: BTreeSet<DetectorId>,
}

/// Channels of a single period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodMember {
    stores: Vec<EventList>,
    spectra: Vec<SpectrumInfo>,
    bin_edges: Option<BinEdges>,
}

impl PeriodMember {
    fn with_layout(spectra: Vec<SpectrumInfo>) -> Self {
        Self {
            stores: vec![EventList::new(); spectra.len()],
            spectra,
            bin_edges: None,
        }
    }

    fn relayout(&mut self, spectra: &[SpectrumInfo]) {
        self.stores = vec![EventList::new(); spectra.len()];
        self.spectra = spectra.to_vec();
    }

    /// Number of channels.
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.stores.len()
    }

    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&EventList> {
        self.stores.get(index)
    }

    pub fn channel_mut(&mut self, index: usize) -> Option<&mut EventList> {
        self.stores.get_mut(index)
    }

    #[must_use]
    pub fn spectrum(&self, index: usize) -> Option<&SpectrumInfo> {
        self.spectra.get(index)
    }

    #[must_use]
    pub fn stores(&self) -> &[EventList] {
        &self.stores
    }

    pub fn stores_mut(&mut self) -> &mut [EventList] {
        &mut self.stores
    }

    #[must_use]
    pub fn bin_edges(&self) -> Option<&BinEdges> {
        self.bin_edges.as_ref()
    }

    pub fn set_bin_edges(&mut self, edges: BinEdges) {
        self.bin_edges = Some(edges);
    }

    /// Sorts every channel.
    pub fn sort(&mut self, order: SortOrder) {
        for store in &mut self.stores {
            store.sort(order);
        }
    }

    /// Total events across channels.
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.stores.iter().map(EventList::len).sum()
    }
}

/// Owns the period members of one load.
#[derive(Debug)]
pub struct EventWorkspaceCollection {
    base: Arc<ExperimentMetadata>,
    overrides: Vec<PeriodOverrides>,
    members: Vec<PeriodMember>,
    state: CollectionState,
}

const BEFORE_INGESTION: &[CollectionState] =
    &[CollectionState::Empty, CollectionState::Configured];
const NOT_INGESTING: &[CollectionState] = &[
    CollectionState::Empty,
    CollectionState::Configured,
    CollectionState::Finalized,
];

impl EventWorkspaceCollection {
    /// Creates a single-period collection with no channels.
    #[must_use]
    pub fn new(base: Arc<ExperimentMetadata>) -> Self {
        Self {
            base,
            overrides: vec![PeriodOverrides::default()],
            members: vec![PeriodMember::default()],
            state: CollectionState::Empty,
        }
    }

    fn require(&self, operation: &'static str, allowed: &[CollectionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                operation,
                state: self.state,
            })
        }
    }

    #[must_use]
    pub fn state(&self) -> CollectionState {
        self.state
    }

    #[must_use]
    pub fn n_periods(&self) -> usize {
        self.members.len()
    }

    /// Channels per member (identical across members).
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.members.first().map_or(0, PeriodMember::n_channels)
    }

    /// Replaces the members with `n` fresh ones sharing the current channel layout.
    ///
    /// Each member gets `current_period` and its "period N" indicator log only
    /// when `n > 1` and the log holds exactly `n` distinct period numbers.
    ///
    /// # Errors
    /// [`Error::InvalidTransition`] outside `Empty`; [`Error::NoPeriods`] for `n == 0`.
    pub fn set_n_periods(&mut self, n: usize, period_log: &NormalizedPeriodLog) -> Result<()> {
        self.require("set the period count", &[CollectionState::Empty])?;
        if n == 0 {
            return Err(Error::NoPeriods);
        }

        let layout = self.members[0].spectra.clone();
        self.members = (0..n)
            .map(|_| PeriodMember::with_layout(layout.clone()))
            .collect();

        let attach = n > 1 && period_log.distinct_count() == n;
        if n > 1 && !attach {
            log::debug!(
                "period log has {} distinct values for {n} periods; per-period logs omitted",
                period_log.distinct_count()
            );
        }
        self.overrides = (1..=n)
            .map(|number| {
                let number = u32::try_from(number).ok().filter(|_| attach);
                PeriodOverrides {
                    current_period: number,
                    period_indicator: number.map(|p| period_log.indicator_series(p)),
                    title: None,
                }
            })
            .collect();

        self.state = CollectionState::Configured;
        Ok(())
    }

    /// One channel per detector, spectrum numbers `1..=len` in the given order.
    ///
    /// # Errors
    /// [`Error::InvalidTransition`] once ingestion has started.
    pub fn pad_channels(&mut self, detector_ids: &[DetectorId]) -> Result<()> {
        self.require("pad channels", BEFORE_INGESTION)?;
        let spectra = detector_ids
            .iter()
            .enumerate()
            .map(|(i, &det)| {
                let spectrum_number = SpectrumNumber::try_from(i + 1)
                    .map_err(|_| Error::Mapping(format!("too many channels ({})", i + 1)))?;
                Ok(SpectrumInfo {
                    spectrum_number,
                    detector_ids: BTreeSet::from([det]),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.relayout(&spectra);
        Ok(())
    }

    /// Channel layout taken from `mapping`, including grouped detectors.
    ///
    /// # Errors
    /// [`Error::InvalidTransition`] once ingestion has started.
    pub fn pad_from_mapping(&mut self, mapping: &ChannelMapping) -> Result<()> {
        self.require("pad channels", BEFORE_INGESTION)?;
        let spectra: Vec<SpectrumInfo> = (0..mapping.n_channels())
            .map(|c| SpectrumInfo {
                spectrum_number: mapping.spectrum_of(c).unwrap_or_default(),
                detector_ids: mapping.detectors_of(c).cloned().unwrap_or_default(),
            })
            .collect();
        self.relayout(&spectra);
        Ok(())
    }

    fn relayout(&mut self, spectra: &[SpectrumInfo]) {
        for member in &mut self.members {
            member.relayout(spectra);
        }
    }

    /// Reserves room for `hint` more events in `channel` of every member.
    ///
    /// # Errors
    /// Out-of-range channel, or ingestion already started.
    pub fn reserve_channel_capacity(&mut self, channel: usize, hint: usize) -> Result<()> {
        self.require("reserve capacity", BEFORE_INGESTION)?;
        self.check_channel(channel)?;
        for member in &mut self.members {
            member.stores[channel].reserve(hint);
        }
        Ok(())
    }

    fn check_channel(&self, index: usize) -> Result<()> {
        let n_channels = self.n_channels();
        if index < n_channels {
            Ok(())
        } else {
            Err(Error::ChannelOutOfRange { index, n_channels })
        }
    }

    fn member_checked(&self, period: usize) -> Result<&PeriodMember> {
        self.members.get(period).ok_or(Error::PeriodOutOfRange {
            index: period,
            n_periods: self.members.len(),
        })
    }

    fn member_checked_mut(&mut self, period: usize) -> Result<&mut PeriodMember> {
        let n_periods = self.members.len();
        self.members.get_mut(period).ok_or(Error::PeriodOutOfRange {
            index: period,
            n_periods,
        })
    }

    /// Events of `index` in period 0.
    ///
    /// Known limitation: this always reads the first period, whatever the
    /// period count. Multi-period callers must use [`Self::channel_in_period`].
    ///
    /// # Errors
    /// [`Error::ChannelOutOfRange`].
    pub fn channel(&self, index: usize) -> Result<&EventList> {
        self.channel_in_period(index, 0)
    }

    /// Events of `index` in `period` (0-based).
    ///
    /// # Errors
    /// Out-of-range channel or period.
    pub fn channel_in_period(&self, index: usize, period: usize) -> Result<&EventList> {
        self.check_channel(index)?;
        Ok(&self.member_checked(period)?.stores[index])
    }

    /// Mutable access to period 0; see [`Self::channel`] for the limitation.
    ///
    /// # Errors
    /// [`Error::ChannelOutOfRange`].
    pub fn channel_mut(&mut self, index: usize) -> Result<&mut EventList> {
        self.channel_in_period_mut(index, 0)
    }

    /// # Errors
    /// Out-of-range channel or period.
    pub fn channel_in_period_mut(&mut self, index: usize, period: usize) -> Result<&mut EventList> {
        self.check_channel(index)?;
        Ok(&mut self.member_checked_mut(period)?.stores[index])
    }

    #[must_use]
    pub fn member(&self, period: usize) -> Option<&PeriodMember> {
        self.members.get(period)
    }

    #[must_use]
    pub fn members(&self) -> &[PeriodMember] {
        &self.members
    }

    /// Metadata seen by `period`.
    ///
    /// # Errors
    /// [`Error::PeriodOutOfRange`].
    pub fn metadata(&self, period: usize) -> Result<MetadataView<'_>> {
        let overrides = self.overrides.get(period).ok_or(Error::PeriodOutOfRange {
            index: period,
            n_periods: self.overrides.len(),
        })?;
        Ok(MetadataView::new(&self.base, overrides))
    }

    /// Metadata shared by all periods.
    #[must_use]
    pub fn base_metadata(&self) -> &Arc<ExperimentMetadata> {
        &self.base
    }

    /// Lends out every member's channel stores, one slice per period.
    ///
    /// # Errors
    /// [`Error::InvalidTransition`] unless `Empty` or `Configured`.
    pub fn begin_ingestion(&mut self) -> Result<Vec<&mut [EventList]>> {
        self.require("begin ingestion", BEFORE_INGESTION)?;
        self.state = CollectionState::Ingesting;
        Ok(self
            .members
            .iter_mut()
            .map(|m| m.stores.as_mut_slice())
            .collect())
    }

    /// Join barrier: all workers are done writing.
    ///
    /// # Errors
    /// [`Error::InvalidTransition`] unless `Ingesting`.
    pub fn finish_ingestion(&mut self) -> Result<()> {
        self.require("finish ingestion", &[CollectionState::Ingesting])?;
        self.state = CollectionState::Finalized;
        Ok(())
    }

    /// Runs `f` over the lent-out stores between [`Self::begin_ingestion`] and
    /// [`Self::finish_ingestion`]. If `f` fails the collection stays `Ingesting`.
    ///
    /// # Errors
    /// Whatever `f` returns, or a state error.
    pub fn ingest<T, E, F>(&mut self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Vec<&mut [EventList]>) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let targets = self.begin_ingestion()?;
        let out = f(targets)?;
        self.finish_ingestion()?;
        Ok(out)
    }

    /// # Errors
    /// [`Error::InvalidTransition`] while ingesting.
    pub fn set_instrument(&mut self, instrument: Arc<Instrument>) -> Result<()> {
        self.require("set the instrument", NOT_INGESTING)?;
        Arc::make_mut(&mut self.base).instrument = instrument;
        Ok(())
    }

    /// # Errors
    /// [`Error::InvalidTransition`] while ingesting.
    pub fn set_title(&mut self, title: impl Into<String>) -> Result<()> {
        self.require("set the title", NOT_INGESTING)?;
        Arc::make_mut(&mut self.base).title = title.into();
        Ok(())
    }

    /// Title for one period only.
    ///
    /// # Errors
    /// Out-of-range period, or called while ingesting.
    pub fn set_period_title(&mut self, period: usize, title: impl Into<String>) -> Result<()> {
        self.require("set the title", NOT_INGESTING)?;
        let n_periods = self.overrides.len();
        let overrides = self
            .overrides
            .get_mut(period)
            .ok_or(Error::PeriodOutOfRange {
                index: period,
                n_periods,
            })?;
        overrides.title = Some(title.into());
        Ok(())
    }

    /// # Errors
    /// [`Error::InvalidTransition`] while ingesting.
    pub fn set_sample_shape(&mut self, shape: SampleShape) -> Result<()> {
        self.require("set the sample shape", NOT_INGESTING)?;
        Arc::make_mut(&mut self.base).sample_shape = Some(shape);
        Ok(())
    }

    /// # Errors
    /// [`Error::InvalidTransition`] while ingesting.
    pub fn set_all_bin_edges(&mut self, edges: &BinEdges) -> Result<()> {
        self.apply_to_all(|m| m.set_bin_edges(edges.clone()))
    }

    /// # Errors
    /// [`Error::InvalidTransition`] while ingesting.
    pub fn sort_all(&mut self, order: SortOrder) -> Result<()> {
        self.apply_to_all(|m| m.sort(order))
    }

    /// Applies `f` to each member in period order.
    ///
    /// # Errors
    /// [`Error::InvalidTransition`] while ingesting.
    pub fn apply_to_all<F: FnMut(&mut PeriodMember)>(&mut self, mut f: F) -> Result<()> {
        self.require("modify members", NOT_INGESTING)?;
        for member in &mut self.members {
            f(member);
        }
        Ok(())
    }

    /// Events across all channels and periods.
    #[must_use]
    pub fn total_events(&self) -> usize {
        self.members.iter().map(PeriodMember::n_events).sum()
    }

    /// Hands the result to the caller: the member itself for one period,
    /// a group labeled `"1"..="n"` otherwise.
    ///
    /// # Errors
    /// [`Error::InvalidTransition`] unless `Finalized`.
    pub fn combined_workspace(self) -> Result<CombinedOutput> {
        self.require("combine workspaces", &[CollectionState::Finalized])?;
        let Self {
            base,
            overrides,
            members,
            ..
        } = self;

        let workspaces: Vec<PeriodWorkspace> = members
            .into_iter()
            .zip(overrides)
            .map(|(member, overrides)| PeriodWorkspace::new(Arc::clone(&base), overrides, member))
            .collect();

        Ok(match <[PeriodWorkspace; 1]>::try_from(workspaces) {
            Ok([single]) => CombinedOutput::Single(single),
            Err(workspaces) => CombinedOutput::Group(WorkspaceGroup::labeled(workspaces)),
        })
    }
}

/// One period's channels and metadata, detached from the collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodWorkspace {
    metadata: Arc<ExperimentMetadata>,
    overrides: PeriodOverrides,
    spectra: Vec<SpectrumInfo>,
    data: Vec<ChannelData>,
    bin_edges: Option<BinEdges>,
}

impl PeriodWorkspace {
    fn new(
        metadata: Arc<ExperimentMetadata>,
        overrides: PeriodOverrides,
        member: PeriodMember,
    ) -> Self {
        Self {
            metadata,
            overrides,
            spectra: member.spectra,
            data: member.stores.into_iter().map(ChannelData::Events).collect(),
            bin_edges: member.bin_edges,
        }
    }

    #[must_use]
    pub fn metadata(&self) -> MetadataView<'_> {
        MetadataView::new(&self.metadata, &self.overrides)
    }

    #[must_use]
    pub fn title(&self) -> &str {
        self.metadata().title()
    }

    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn spectrum(&self, index: usize) -> Option<&SpectrumInfo> {
        self.spectra.get(index)
    }

    #[must_use]
    pub fn data(&self, index: usize) -> Option<&ChannelData> {
        self.data.get(index)
    }

    /// Events of `index`, if it has not been binned.
    #[must_use]
    pub fn events(&self, index: usize) -> Option<&EventList> {
        self.data.get(index).and_then(ChannelData::as_events)
    }

    #[must_use]
    pub fn bin_edges(&self) -> Option<&BinEdges> {
        self.bin_edges.as_ref()
    }

    #[must_use]
    pub fn n_events(&self) -> usize {
        self.data
            .iter()
            .filter_map(ChannelData::as_events)
            .map(EventList::len)
            .sum()
    }

    /// Bins every channel over the workspace bin edges.
    ///
    /// # Errors
    /// [`Error::MissingBinEdges`] if none were set.
    pub fn into_histograms(self) -> Result<Self> {
        let edges = self.bin_edges.clone().ok_or(Error::MissingBinEdges)?;
        Ok(Self {
            data: self
                .data
                .into_iter()
                .map(|d| d.into_histogram(&edges))
                .collect(),
            ..self
        })
    }
}

/// Period workspaces labeled by 1-based period number.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceGroup {
    members: Vec<(String, PeriodWorkspace)>,
}

impl WorkspaceGroup {
    fn labeled(workspaces: Vec<PeriodWorkspace>) -> Self {
        Self {
            members: workspaces
                .into_iter()
                .enumerate()
                .map(|(i, ws)| ((i + 1).to_string(), ws))
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&PeriodWorkspace> {
        self.members
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, ws)| ws)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(l, _)| l.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PeriodWorkspace)> {
        self.members.iter().map(|(l, ws)| (l.as_str(), ws))
    }

    #[must_use]
    pub fn into_members(self) -> Vec<(String, PeriodWorkspace)> {
        self.members
    }
}

/// Result of [`EventWorkspaceCollection::combined_workspace`].
#[derive(Debug, Clone, PartialEq)]
pub enum CombinedOutput {
    Single(PeriodWorkspace),
    Group(WorkspaceGroup),
}

impl CombinedOutput {
    #[must_use]
    pub fn n_periods(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Group(group) => group.len(),
        }
    }

    /// Workspace of `period` (0-based).
    #[must_use]
    pub fn workspace(&self, period: usize) -> Option<&PeriodWorkspace> {
        match self {
            Self::Single(ws) => (period == 0).then_some(ws),
            Self::Group(group) => group.members.get(period).map(|(_, ws)| ws),
        }
    }

    #[must_use]
    pub fn total_events(&self) -> usize {
        match self {
            Self::Single(ws) => ws.n_events(),
            Self::Group(group) => group.members.iter().map(|(_, ws)| ws.n_events()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, PulseTime};
    use crate::metadata::CURRENT_PERIOD_LOG;
    use crate::period::{split_by_period, PeriodLog};

    fn base() -> Arc<ExperimentMetadata> {
        Arc::new(ExperimentMetadata::new(
            "test run",
            Arc::new(Instrument::new("TEST").with_bank("bank1", vec![1, 2, 3])),
        ))
    }

    fn three_period_log() -> NormalizedPeriodLog {
        let log = PeriodLog::new(vec![
            (PulseTime(0), 1),
            (PulseTime(10), 2),
            (PulseTime(20), 3),
        ]);
        split_by_period(log, 3).unwrap()
    }

    fn finalize(coll: &mut EventWorkspaceCollection) {
        coll.ingest(|_| Ok::<_, Error>(())).unwrap();
    }

    #[test]
    fn test_three_periods_get_current_period() {
        let mut coll = EventWorkspaceCollection::new(base());
        coll.set_n_periods(3, &three_period_log()).unwrap();
        assert_eq!(coll.n_periods(), 3);
        assert_eq!(coll.state(), CollectionState::Configured);
        for p in 0..3 {
            let view = coll.metadata(p).unwrap();
            assert_eq!(view.current_period(), Some(u32::try_from(p + 1).unwrap()));
            assert!(view.log(&format!("period {}", p + 1)).is_some());
        }
    }

    #[test]
    fn test_mismatched_distinct_count_omits_overrides() {
        let log = split_by_period(PeriodLog::new(vec![(PulseTime(0), 2)]), 2).unwrap();
        let mut coll = EventWorkspaceCollection::new(base());
        coll.set_n_periods(2, &log).unwrap();
        assert_eq!(coll.n_periods(), 2);
        assert!(coll.metadata(1).unwrap().log(CURRENT_PERIOD_LOG).is_none());
    }

    #[test]
    fn test_single_period_is_noop() {
        let mut plain = EventWorkspaceCollection::new(base());
        plain.pad_channels(&[1, 2, 3]).unwrap();
        finalize(&mut plain);

        let mut configured = EventWorkspaceCollection::new(base());
        configured
            .set_n_periods(1, &NormalizedPeriodLog::single())
            .unwrap();
        configured.pad_channels(&[1, 2, 3]).unwrap();
        finalize(&mut configured);

        assert_eq!(
            plain.combined_workspace().unwrap(),
            configured.combined_workspace().unwrap()
        );
    }

    #[test]
    fn test_legacy_zero_log_is_noop() {
        let log = split_by_period(PeriodLog::new(vec![(PulseTime(5), 0)]), 1).unwrap();
        let mut coll = EventWorkspaceCollection::new(base());
        coll.set_n_periods(1, &log).unwrap();
        assert!(coll.metadata(0).unwrap().current_period().is_none());
    }

    #[test]
    fn test_broadcast_consistency() {
        let mut coll = EventWorkspaceCollection::new(base());
        coll.set_n_periods(3, &three_period_log()).unwrap();
        coll.pad_channels(&[1, 2, 3]).unwrap();
        finalize(&mut coll);

        let edges = BinEdges::new(vec![0.0, 10.0, 20.0]).unwrap();
        let instrument = Arc::new(Instrument::new("NEW"));
        coll.set_all_bin_edges(&edges).unwrap();
        coll.set_instrument(Arc::clone(&instrument)).unwrap();
        coll.set_title("renamed").unwrap();
        coll.set_sample_shape(SampleShape::Sphere { radius: 0.5 })
            .unwrap();

        for p in 0..3 {
            let member = coll.member(p).unwrap();
            assert_eq!(member.n_channels(), 3);
            assert_eq!(member.bin_edges(), Some(&edges));
            let view = coll.metadata(p).unwrap();
            assert_eq!(view.instrument().name, "NEW");
            assert_eq!(view.title(), "renamed");
            assert_eq!(view.sample_shape(), Some(SampleShape::Sphere { radius: 0.5 }));
            assert_eq!(member.spectrum(2).unwrap().spectrum_number, 3);
        }
    }

    #[test]
    fn test_group_vs_single() {
        let mut single = EventWorkspaceCollection::new(base());
        finalize(&mut single);
        let out = single.combined_workspace().unwrap();
        assert!(matches!(out, CombinedOutput::Single(_)));
        assert_eq!(out.n_periods(), 1);

        let mut multi = EventWorkspaceCollection::new(base());
        multi.set_n_periods(3, &three_period_log()).unwrap();
        finalize(&mut multi);
        let CombinedOutput::Group(group) = multi.combined_workspace().unwrap() else {
            panic!("expected a group");
        };
        assert_eq!(group.len(), 3);
        assert_eq!(group.labels().collect::<Vec<_>>(), vec!["1", "2", "3"]);
        assert_eq!(
            group.get("2").unwrap().metadata().current_period(),
            Some(2)
        );
    }

    #[test]
    fn test_channel_reads_first_period() {
        let mut coll = EventWorkspaceCollection::new(base());
        coll.set_n_periods(3, &three_period_log()).unwrap();
        coll.pad_channels(&[1, 2]).unwrap();
        coll.ingest(|mut periods| {
            periods[0][1].push(Event::new(1.0, PulseTime(0)));
            periods[2][1].push(Event::new(2.0, PulseTime(25)));
            periods[2][1].push(Event::new(3.0, PulseTime(26)));
            Ok::<_, Error>(())
        })
        .unwrap();

        // Period 0 regardless of how many periods exist.
        assert_eq!(coll.channel(1).unwrap().len(), 1);
        assert_eq!(coll.channel_in_period(1, 2).unwrap().len(), 2);
        assert!(matches!(
            coll.channel_in_period(1, 3),
            Err(Error::PeriodOutOfRange { index: 3, .. })
        ));
        assert!(matches!(
            coll.channel(2),
            Err(Error::ChannelOutOfRange { index: 2, n_channels: 2 })
        ));
        assert_eq!(coll.total_events(), 3);
    }

    #[test]
    fn test_state_transitions_enforced() {
        let mut coll = EventWorkspaceCollection::new(base());
        coll.set_n_periods(1, &NormalizedPeriodLog::single()).unwrap();
        let err = coll
            .set_n_periods(2, &NormalizedPeriodLog::single())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                state: CollectionState::Configured,
                ..
            }
        ));
        assert!(coll.finish_ingestion().is_err());

        let _ = coll.begin_ingestion().unwrap();
        assert!(coll.set_title("x").is_err());
        assert!(coll.pad_channels(&[1]).is_err());
        coll.finish_ingestion().unwrap();
        assert!(coll.begin_ingestion().is_err());
        assert!(coll.reserve_channel_capacity(0, 1).is_err());
        assert!(coll.combined_workspace().is_ok());

        let fresh = EventWorkspaceCollection::new(base());
        assert!(fresh.combined_workspace().is_err());
    }

    #[test]
    fn test_reserve_and_mapping_layout() {
        let mapping =
            ChannelMapping::from_spectra_table(&[(10, vec![1, 2]), (20, vec![3])]).unwrap();
        let mut coll = EventWorkspaceCollection::new(base());
        coll.set_n_periods(3, &three_period_log()).unwrap();
        coll.pad_from_mapping(&mapping).unwrap();
        coll.reserve_channel_capacity(1, 64).unwrap();
        assert!(coll.reserve_channel_capacity(2, 1).is_err());

        for member in coll.members() {
            assert!(member.channel(1).unwrap().capacity() >= 64);
            assert_eq!(member.spectrum(0).unwrap().spectrum_number, 10);
            assert_eq!(member.spectrum(0).unwrap().detector_ids.len(), 2);
        }
    }

    #[test]
    fn test_into_histograms() {
        let mut coll = EventWorkspaceCollection::new(base());
        coll.pad_channels(&[1]).unwrap();
        coll.ingest(|mut periods| {
            periods[0][0].push(Event::new(5.0, PulseTime(0)));
            periods[0][0].push(Event::new(15.0, PulseTime(0)));
            Ok::<_, Error>(())
        })
        .unwrap();
        coll.set_period_title(0, "binned").unwrap();

        let CombinedOutput::Single(ws) = coll.combined_workspace().unwrap() else {
            panic!("expected a single workspace");
        };
        assert_eq!(ws.title(), "binned");
        assert!(matches!(ws.clone().into_histograms(), Err(Error::MissingBinEdges)));

        let mut coll = EventWorkspaceCollection::new(base());
        coll.pad_channels(&[1]).unwrap();
        coll.ingest(|mut periods| {
            periods[0][0].push(Event::new(5.0, PulseTime(0)));
            Ok::<_, Error>(())
        })
        .unwrap();
        coll.set_all_bin_edges(&BinEdges::new(vec![0.0, 10.0, 20.0]).unwrap())
            .unwrap();
        let CombinedOutput::Single(ws) = coll.combined_workspace().unwrap() else {
            panic!("expected a single workspace");
        };
        let ws = ws.into_histograms().unwrap();
        let hist = ws.data(0).unwrap().as_histogram().unwrap();
        assert_eq!(hist.counts, vec![1.0, 0.0]);
    }
}
