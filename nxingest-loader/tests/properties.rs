mod common;

use common::*;
use nxingest_core::{
    BinEdges, ChannelMapping, CombinedOutput, EventWorkspaceCollection, Instrument,
    NormalizedPeriodLog, SortOrder,
};
use nxingest_io::{MemoryBank, MemoryRunLog, MemorySource};
use nxingest_loader::{Dispatch, EventLoader, LoadResult, LocalLauncher};
use std::sync::Arc;

fn noisy_source() -> MemorySource {
    MemorySource::new()
        .with_bank(MemoryBank::new("bank1").with_events(&[
            (100, 1000.0, 0),
            (7, 1.0, 0),
            (101, 1010.0, 1),
            (102, 99_999.0, 1),
            (150, 1.0, 2),
            (102, 1020.0, 2),
        ]))
        .with_bank(MemoryBank::new("bank2").with_events(&[
            (200, 2000.0, 0),
            (201, 2010.0, 1),
            (999, 1.0, 1),
            (200, 2001.0, 2),
        ]))
}

fn load(source: &MemorySource, run_log: &MemoryRunLog) -> LoadResult {
    let instrument = two_bank_instrument();
    EventLoader::new(source, one_to_one(&instrument), metadata(instrument))
        .with_run_log(run_log)
        .with_config(config().with_tof_window(500.0, 5000.0))
        .load()
        .unwrap()
}

#[test]
fn test_every_read_event_is_accounted_for() {
    let result = load(&noisy_source(), &run_log());
    let report = &result.report;
    assert_eq!(report.events_read(), 10);
    assert_eq!(
        report.events_kept() + report.events_discarded_unmapped() + report.events_discarded_by_filter(),
        report.events_read()
    );
    assert_eq!(report.events_discarded_unmapped(), 3);
    assert_eq!(report.events_discarded_by_filter(), 1);
    assert_eq!(report.events_kept(), 6);
    assert!(report.is_conserved());
    assert_eq!(
        result.collection.total_events() as u64,
        report.events_kept()
    );
}

#[test]
fn test_kept_events_satisfy_the_bank_offset() {
    // TOFs encode the raw id as `id * 10 + k`.
    let result = load(&two_bank_source(), &run_log());
    let mapping = one_to_one(&two_bank_instrument());
    for channel in 0..result.collection.n_channels() {
        let detectors = mapping.detectors_of(channel).unwrap();
        for tof in tofs(&result, channel, 0) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let raw_id = (tof / 10.0) as u32;
            assert!(detectors.contains(&raw_id), "id {raw_id} in channel {channel}");
        }
    }
}

#[test]
fn test_single_trivial_period_is_a_no_op() {
    let source = two_bank_source();
    let plain = load(&source, &run_log()).into_output().unwrap();
    let declared_one = MemoryRunLog::new()
        .with_periods(1, &[(0, 1)])
        .with_pulse_times(pulses(3));
    let with_log = load(&source, &declared_one).into_output().unwrap();
    assert_eq!(plain, with_log);

    let metadata = metadata(two_bank_instrument());
    let untouched = EventWorkspaceCollection::new(Arc::clone(&metadata));
    let mut configured = EventWorkspaceCollection::new(metadata);
    configured
        .set_n_periods(1, &NormalizedPeriodLog::single())
        .unwrap();
    let finish = |mut c: EventWorkspaceCollection| {
        c.ingest(|_| Ok::<_, nxingest_core::Error>(())).unwrap();
        c.combined_workspace().unwrap()
    };
    assert_eq!(finish(untouched), finish(configured));
}

#[test]
fn test_broadcasts_reach_every_period() {
    let source = two_bank_source();
    let run_log = MemoryRunLog::new()
        .with_periods(3, &[(0, 1), (1000, 2), (2000, 3)])
        .with_pulse_times(pulses(3));
    let mut collection = load(&source, &run_log).collection;

    let edges = collection.member(0).unwrap().bin_edges().cloned().unwrap();
    for member in collection.members() {
        assert_eq!(member.bin_edges(), Some(&edges));
    }

    let fine = BinEdges::new(vec![0.0, 1500.0, 3000.0]).unwrap();
    collection.set_all_bin_edges(&fine).unwrap();
    collection
        .set_instrument(Arc::new(Instrument::new("RENAMED")))
        .unwrap();
    collection.sort_all(SortOrder::Tof).unwrap();
    for period in 0..collection.n_periods() {
        assert_eq!(collection.member(period).unwrap().bin_edges(), Some(&fine));
        assert_eq!(
            collection.metadata(period).unwrap().instrument().name,
            "RENAMED"
        );
        for channel in 0..collection.n_channels() {
            let list = collection.channel_in_period(channel, period).unwrap();
            assert_eq!(list.order(), SortOrder::Tof);
        }
    }
}

#[test]
fn test_group_iff_several_periods() {
    let source = two_bank_source();
    let single = load(&source, &run_log()).into_output().unwrap();
    assert!(matches!(single, CombinedOutput::Single(_)));
    assert_eq!(single.n_periods(), 1);

    let run_log = MemoryRunLog::new()
        .with_periods(2, &[(0, 1), (1000, 2)])
        .with_pulse_times(pulses(3));
    let group = load(&source, &run_log).into_output().unwrap();
    let CombinedOutput::Group(members) = &group else {
        panic!("expected a group");
    };
    assert_eq!(members.len(), 2);
    assert_eq!(members.labels().collect::<Vec<_>>(), vec!["1", "2"]);
    assert_eq!(group.total_events(), 8);
}

#[test]
fn test_channel_reads_first_period_only() {
    let source = two_bank_source();
    let run_log = MemoryRunLog::new()
        .with_periods(2, &[(0, 1), (1000, 2)])
        .with_pulse_times(pulses(3));
    let result = load(&source, &run_log);
    // Detector 100 fired in pulses 0 (period 1) and 2 (period 2).
    assert_eq!(result.collection.channel(0).unwrap().tofs(), vec![1000.0]);
    assert_eq!(tofs(&result, 0, 1), vec![1001.0]);
}

#[test]
fn test_histograms_cover_the_observed_tof_range() {
    let result = load(&two_bank_source(), &run_log());
    let output = result.into_output().unwrap();
    let CombinedOutput::Single(workspace) = output else {
        panic!("expected a single workspace");
    };
    let edges = workspace.bin_edges().unwrap().as_slice().to_vec();
    assert_eq!(edges, vec![999.0, 2011.0]);
    let histograms = workspace.into_histograms().unwrap();
    let counts: f64 = (0..histograms.n_channels())
        .map(|c| histograms.data(c).unwrap().as_histogram().unwrap().counts.iter().sum::<f64>())
        .sum();
    approx::assert_relative_eq!(counts, 8.0);
}

fn single_bank(events: &[(u32, f64, u32)]) -> MemorySource {
    MemorySource::new().with_bank(MemoryBank::new("bank1").with_events(events))
}

fn load_single_bank(
    source: &MemorySource,
    mapping: Arc<ChannelMapping>,
    ids: Vec<u32>,
    dispatch: Dispatch<'_>,
) -> LoadResult {
    let run_log = run_log();
    let instrument = Instrument::new("IRREGULAR").with_bank("bank1", ids);
    EventLoader::new(source, mapping, metadata(instrument))
        .with_run_log(&run_log)
        .with_config(config())
        .load_with(dispatch)
        .unwrap()
}

#[test]
fn test_grouped_detectors_keep_every_event() {
    let table = vec![(1, vec![100, 101]), (2, vec![102])];
    let mapping = Arc::new(ChannelMapping::from_spectra_table(&table).unwrap());
    let source = single_bank(&[(100, 1.0, 0), (101, 2.0, 0), (102, 3.0, 0), (103, 4.0, 0)]);
    let launcher = LocalLauncher::new(&source);
    for dispatch in [
        Dispatch::Sequential,
        Dispatch::Threads { workers: 2 },
        Dispatch::Processes(&launcher),
    ] {
        let ids = vec![100, 101, 102];
        let result = load_single_bank(&source, Arc::clone(&mapping), ids, dispatch);
        assert_eq!(result.report.events_kept(), 3, "{dispatch:?}");
        assert_eq!(result.report.events_discarded_unmapped(), 1, "{dispatch:?}");
        assert_eq!(tofs(&result, 0, 0), vec![1.0, 2.0]);
        assert_eq!(tofs(&result, 1, 0), vec![3.0]);
    }
}

#[test]
fn test_gapped_detector_ids_keep_every_event() {
    // A monitor at 101 is left out of the mapping.
    let mapping = Arc::new(ChannelMapping::one_to_one([100, 102, 104]).unwrap());
    let source = single_bank(&[(100, 1.0, 0), (102, 2.0, 1), (104, 3.0, 2), (101, 9.0, 0)]);
    let result = load_single_bank(&source, mapping, vec![100, 102, 104], Dispatch::Sequential);
    assert_eq!(result.report.events_kept(), 3);
    assert_eq!(result.report.events_discarded_unmapped(), 1);
    assert_eq!(tofs(&result, 2, 0), vec![3.0]);
}
