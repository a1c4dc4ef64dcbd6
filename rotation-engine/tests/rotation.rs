// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! End-to-end rotation scenarios against a real on-disk store.

use std::{collections::HashSet, fs::File, sync::Arc};

use arrow::array::{Int64Array, StringArray};
use core_types::{Backoff, HourPeriod, Record, RecordKind, RotationConfig};
use export_engine::{ExportError, Exporter};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rotation_engine::{RotationCoordinator, RotationError, RotationOutcome};
use segment_store::{SegmentRole, SegmentStore};
use stream_writer::{StreamWriter, WriterMode};

struct Harness {
    store: Arc<SegmentStore>,
    writer: Arc<StreamWriter>,
    exporter: Arc<Exporter>,
    coordinator: Arc<RotationCoordinator>,
    _dir: tempfile::TempDir,
}

fn harness(stream: &str) -> Harness {
    harness_with(stream, RotationConfig::default(), 10_000)
}

fn harness_with(stream: &str, cfg: RotationConfig, buffer_capacity: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SegmentStore::open(dir.path().join("data")).unwrap());
    let active = store.create_segment(stream, SegmentRole::Active).unwrap();
    let writer = Arc::new(StreamWriter::new(
        stream,
        active,
        buffer_capacity,
        Backoff::new(2, 1, 1, 0.0),
    ));
    let exporter = Arc::new(Exporter::new(dir.path().join("exports"), true).unwrap());
    let coordinator = Arc::new(RotationCoordinator::new(
        stream,
        store.clone(),
        writer.clone(),
        exporter.clone(),
        cfg,
    ));
    Harness {
        store,
        writer,
        exporter,
        coordinator,
        _dir: dir,
    }
}

fn record(ts_ns: i64, payload: &str) -> Record {
    Record::new(ts_ns, RecordKind::Deal, payload)
}

fn artifact_payloads(path: &std::path::Path) -> Vec<(i64, String)> {
    let file = File::open(path).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap();
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.unwrap();
        let ts = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        let payloads = batch
            .column(2)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        for i in 0..batch.num_rows() {
            rows.push((ts.value(i), payloads.value(i).to_string()));
        }
    }
    rows
}

#[tokio::test(flavor = "multi_thread")]
async fn rotation_after_second_record_splits_the_stream() {
    let h = harness("btc");
    h.writer.submit(record(1, "r1")).await.unwrap();
    h.writer.submit(record(2, "r2")).await.unwrap();

    let outcome = h
        .coordinator
        .rotate_now(HourPeriod::containing(0))
        .await
        .unwrap();
    let artifact = match outcome {
        RotationOutcome::Completed { artifact, .. } => artifact.expect("artifact"),
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(artifact.row_count, 2);

    h.writer.submit(record(3, "r3")).await.unwrap();
    h.writer.submit(record(4, "r4")).await.unwrap();
    h.writer.submit(record(5, "r5")).await.unwrap();

    let exported = artifact_payloads(&artifact.file_path);
    assert_eq!(
        exported,
        vec![(1, "r1".to_string()), (2, "r2".to_string())]
    );

    let active = h.store.handle("btc", SegmentRole::Active).unwrap();
    let live: Vec<_> = active
        .scan()
        .unwrap()
        .into_iter()
        .map(|r| r.payload)
        .collect();
    assert_eq!(live, vec!["r3", "r4", "r5"]);

    // Five records total across artifact and active, none duplicated.
    let mut seen: HashSet<String> = exported.into_iter().map(|(_, p)| p).collect();
    for payload in live {
        assert!(seen.insert(payload));
    }
    assert_eq!(seen.len(), 5);
    assert!(h.store.handle("btc", SegmentRole::Frozen).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn no_loss_with_submissions_racing_the_rotation() {
    let h = harness("btc");
    let total: i64 = 2_000;

    let feeder = {
        let writer = h.writer.clone();
        tokio::spawn(async move {
            for i in 0..total {
                writer.submit(record(i, &format!("p{i}"))).await.unwrap();
                if i % 256 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let mut artifacts = Vec::new();
    for cycle in 0..3 {
        tokio::task::yield_now().await;
        let period = HourPeriod {
            start_ns: cycle * core_types::NANOS_PER_HOUR,
        };
        if let RotationOutcome::Completed { artifact, .. } =
            h.coordinator.rotate_now(period).await.unwrap()
        {
            artifacts.extend(artifact);
        }
    }
    feeder.await.unwrap();

    let mut collected: Vec<i64> = artifacts
        .iter()
        .flat_map(|a| artifact_payloads(&a.file_path))
        .map(|(ts, _)| ts)
        .collect();
    let active = h.store.handle("btc", SegmentRole::Active).unwrap();
    collected.extend(active.scan().unwrap().iter().map(|r| r.ts_ns));

    // Union of exports and the live segment covers every submission
    // exactly once.
    collected.sort_unstable();
    let expected: Vec<i64> = (0..total).collect();
    assert_eq!(collected, expected);
    assert_eq!(h.writer.stats().mode, stream_writer::WriterMode::Normal);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_rotation_in_same_hour_preserves_new_records() {
    let h = harness("btc");
    let period = HourPeriod::containing(0);

    h.writer.submit(record(1, "r1")).await.unwrap();
    let first = match h.coordinator.rotate_now(period).await.unwrap() {
        RotationOutcome::Completed { artifact, .. } => artifact.unwrap(),
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(first.row_count, 1);

    // A second explicit trigger inside the same hour must not let the
    // logged artifact stand in for the new segment's records.
    h.writer.submit(record(2, "r2")).await.unwrap();
    let err = h.coordinator.rotate_now(period).await.unwrap_err();
    assert!(matches!(
        err,
        RotationError::Export(ExportError::Verification { .. })
    ));

    // The new record survives in the preserved frozen segment and the
    // original artifact is untouched.
    let frozen = h.store.handle("btc", SegmentRole::Frozen).expect("frozen");
    let preserved = frozen.scan().unwrap();
    assert_eq!(preserved.len(), 1);
    assert_eq!(preserved[0].payload, "r2");
    assert_eq!(
        artifact_payloads(&first.file_path),
        vec![(1, "r1".to_string())]
    );
    let logged = h.exporter.completed("btc", &period).unwrap();
    assert_eq!(logged.checksum, first.checksum);
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_timeout_aborts_cycle_without_losing_records() {
    let total = 50_000i64;
    let cfg = RotationConfig {
        drain_timeout_ms: 1,
        ..RotationConfig::default()
    };
    let h = harness_with("btc", cfg, 100_000);

    h.writer.begin_buffering().unwrap();
    for i in 0..total {
        h.writer.submit(record(i, &format!("p{i}"))).await.unwrap();
    }

    let err = h
        .coordinator
        .rotate_now(HourPeriod::containing(0))
        .await
        .unwrap_err();
    assert!(matches!(err, RotationError::DrainTimeout { .. }));
    // The frozen segment from the aborted cycle is preserved.
    assert!(h.store.handle("btc", SegmentRole::Frozen).is_some());

    // The drain keeps running past the aborted cycle; every buffered
    // record lands in the new active segment.
    for _ in 0..1_500 {
        if h.writer.stats().mode == WriterMode::Normal {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(h.writer.stats().mode, WriterMode::Normal);
    let active = h.store.handle("btc", SegmentRole::Active).unwrap();
    assert_eq!(active.row_count(), total as u64);

    // A follow-up cycle with sane timeouts recovers the leftover and
    // exports everything.
    let retry = RotationCoordinator::new(
        "btc",
        h.store.clone(),
        h.writer.clone(),
        h.exporter.clone(),
        RotationConfig::default(),
    );
    let artifact = match retry
        .rotate_now(HourPeriod::containing(0))
        .await
        .unwrap()
    {
        RotationOutcome::Completed { artifact, .. } => artifact.unwrap(),
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(artifact.row_count, total as u64);
    assert!(h.store.handle("btc", SegmentRole::Frozen).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn export_of_one_period_is_idempotent() {
    let h = harness("btc");
    for i in 0..10 {
        h.writer.submit(record(i, &format!("p{i}"))).await.unwrap();
    }
    // Freeze by hand so the frozen segment survives for a second export.
    h.writer.begin_buffering().unwrap();
    let frozen = h
        .store
        .rename("btc", SegmentRole::Active, SegmentRole::Frozen)
        .unwrap();
    let replacement = h.store.create_segment("btc", SegmentRole::Active).unwrap();
    h.writer.install_active(replacement).await.unwrap();

    let period = HourPeriod::containing(0);
    let first = h.exporter.export(&frozen, &period).unwrap();
    let second = h.exporter.export(&frozen, &period).unwrap();
    assert_eq!(first.row_count, second.row_count);
    assert_eq!(first.checksum, second.checksum);
    assert_eq!(first.file_path, second.file_path);
    assert_eq!(first.exported_ns, second.exported_ns);

    // One log row for the period, even after a reload.
    let reloaded =
        export_engine::ExportLog::load(h._dir.path().join("exports").join("export_log.parquet"))
            .unwrap();
    assert_eq!(reloaded.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn consecutive_hours_produce_distinct_artifacts() {
    let h = harness("eth");
    h.writer.submit(record(10, "first-hour")).await.unwrap();
    let first = match h
        .coordinator
        .rotate_now(HourPeriod::containing(0))
        .await
        .unwrap()
    {
        RotationOutcome::Completed { artifact, .. } => artifact.unwrap(),
        other => panic!("unexpected outcome: {other:?}"),
    };

    h.writer
        .submit(record(core_types::NANOS_PER_HOUR + 10, "second-hour"))
        .await
        .unwrap();
    let second = match h
        .coordinator
        .rotate_now(HourPeriod::containing(core_types::NANOS_PER_HOUR))
        .await
        .unwrap()
    {
        RotationOutcome::Completed { artifact, .. } => artifact.unwrap(),
        other => panic!("unexpected outcome: {other:?}"),
    };

    assert_ne!(first.file_path, second.file_path);
    assert_eq!(first.row_count, 1);
    assert_eq!(second.row_count, 1);
    assert!(h.exporter.completed("eth", &HourPeriod::containing(0)).is_some());
    assert!(h
        .exporter
        .completed("eth", &HourPeriod::containing(core_types::NANOS_PER_HOUR))
        .is_some());
}
