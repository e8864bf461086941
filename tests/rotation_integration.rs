use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use image::{ImageFormat, Rgba, RgbaImage};
use memory_frame::blob::MemoryBlobStore;
use memory_frame::config::{OverlayOptions, RotationOptions, SelectionOptions};
use memory_frame::device::DeviceId;
use memory_frame::display_log::DisplayLog;
use memory_frame::events::RotationCommand;
use memory_frame::model::ImageRecord;
use memory_frame::processing::compose::Composer;
use memory_frame::retry::RetryPolicy;
use memory_frame::selector::Selector;
use memory_frame::sink::MemorySink;
use memory_frame::store::memory::{MemoryCatalog, MemoryDisplayLog};
use memory_frame::tasks::rotation::{CycleOutcome, ManualClock, Rotation, RotationState};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type TestRotation = Rotation<
    MemoryCatalog,
    Arc<MemoryDisplayLog>,
    Arc<MemoryBlobStore>,
    Arc<MemorySink>,
    ManualClock,
>;

struct Harness {
    rotation: TestRotation,
    log: Arc<MemoryDisplayLog>,
    blobs: Arc<MemoryBlobStore>,
    sink: Arc<MemorySink>,
    clock: ManualClock,
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn png(color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(64, 48, Rgba(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn record(id: &str, created: NaiveDate) -> ImageRecord {
    ImageRecord {
        storage_key: format!("{id}.png"),
        id: id.to_string(),
        display_name: id.to_string(),
        creation_date: created,
    }
}

fn harness(records: Vec<ImageRecord>, today: NaiveDate, interval: Duration) -> Harness {
    let blobs = Arc::new(MemoryBlobStore::new());
    for r in &records {
        blobs.insert(r.storage_key.clone(), png([120, 60, 30, 255]));
    }
    harness_with(records, today, interval, blobs)
}

fn harness_with(
    records: Vec<ImageRecord>,
    today: NaiveDate,
    interval: Duration,
    blobs: Arc<MemoryBlobStore>,
) -> Harness {
    let log = Arc::new(MemoryDisplayLog::new());
    let sink = Arc::new(MemorySink::new());
    let clock = ManualClock::new(today);
    let selector = Selector::new(
        MemoryCatalog::new(records),
        DisplayLog::new(log.clone()),
        SelectionOptions {
            shuffle_seed: Some(11),
            ..SelectionOptions::default()
        },
        DeviceId::new("test-frame"),
    );
    let overlay = OverlayOptions {
        enabled: false,
        ..OverlayOptions::default()
    };
    let rotation = Rotation::new(
        selector,
        blobs.clone(),
        Composer::new(overlay),
        sink.clone(),
        clock.clone(),
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(2),
        },
        RotationOptions {
            interval,
            idle_retry: interval * 6,
        },
        (160, 120),
    );
    Harness {
        rotation,
        log,
        blobs,
        sink,
        clock,
    }
}

fn shown(id: &str) -> CycleOutcome {
    CycleOutcome::Shown {
        image_id: id.to_string(),
    }
}

#[tokio::test]
async fn cycles_through_todays_images_and_wraps() {
    let today = date(2024, 7, 4);
    let mut h = harness(
        vec![
            record("old", date(2010, 7, 4)),
            record("new", date(2020, 7, 4)),
        ],
        today,
        Duration::from_secs(300),
    );

    assert_eq!(h.rotation.step().await, shown("new"));
    assert_eq!(h.rotation.step().await, shown("old"));
    assert_eq!(h.rotation.step().await, shown("new"));
    assert_eq!(h.rotation.state(), RotationState::Cycling { index: 1 });

    assert_eq!(h.sink.len(), 3);
    assert_eq!(h.sink.frames()[0].image.dimensions(), (160, 120));
    // Showing "new" twice on the same day is logged once.
    let entries = h.log.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.display_date == today && e.device_id == "test-frame"));
}

#[tokio::test]
async fn new_day_reselects_from_the_catalog() {
    let mut h = harness(
        vec![
            record("july-4", date(2015, 7, 4)),
            record("july-5", date(2016, 7, 5)),
        ],
        date(2024, 7, 4),
        Duration::from_secs(300),
    );
    assert_eq!(h.rotation.step().await, shown("july-4"));

    h.clock.set(date(2024, 7, 5));
    assert_eq!(h.rotation.step().await, shown("july-5"));
    assert!(!h.rotation.candidates().used_fallback);
    assert_eq!(h.rotation.candidates().len(), 1);
}

#[tokio::test]
async fn empty_day_goes_idle_with_longer_wait() {
    let mut h = harness(Vec::new(), date(2024, 7, 4), Duration::from_secs(300));
    let outcome = h.rotation.step().await;
    assert_eq!(outcome, CycleOutcome::Idle);
    assert_eq!(h.rotation.state(), RotationState::Idle);
    assert_eq!(h.rotation.wait_after(&outcome), Duration::from_secs(1800));
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn fetch_failure_skips_to_next_candidate() {
    // The newest image has no bytes in storage.
    let blobs = Arc::new(MemoryBlobStore::new());
    blobs.insert("present.png", png([1, 2, 3, 255]));
    let mut h = harness_with(
        vec![
            record("missing", date(2020, 7, 4)),
            record("present", date(2012, 7, 4)),
        ],
        date(2024, 7, 4),
        Duration::from_secs(300),
        blobs,
    );

    assert_eq!(h.rotation.step().await, shown("present"));
    assert_eq!(h.sink.len(), 1);
    let logged: Vec<String> = h.log.entries().into_iter().map(|e| e.image_id).collect();
    assert_eq!(logged, vec!["present".to_string()]);
    // The index moved past the failed candidate and the shown one.
    assert_eq!(h.rotation.state(), RotationState::Cycling { index: 0 });
    assert_eq!(h.rotation.step().await, shown("present"));
}

#[tokio::test]
async fn every_candidate_failing_reports_nothing_shown() {
    let mut h = harness_with(
        vec![record("gone", date(2020, 7, 4))],
        date(2024, 7, 4),
        Duration::from_secs(300),
        Arc::new(MemoryBlobStore::new()),
    );
    let outcome = h.rotation.step().await;
    assert_eq!(outcome, CycleOutcome::NothingShown);
    assert_eq!(h.rotation.wait_after(&outcome), Duration::from_secs(300));
    assert!(h.sink.is_empty());
    assert!(h.log.entries().is_empty());
}

#[tokio::test]
async fn transient_fetch_errors_are_retried() {
    let mut h = harness(
        vec![record("flaky", date(2019, 7, 4))],
        date(2024, 7, 4),
        Duration::from_secs(300),
    );
    h.blobs.fail_transiently("flaky.png", 1);
    assert_eq!(h.rotation.step().await, shown("flaky"));
}

#[tokio::test]
async fn sink_failure_keeps_loop_alive_without_logging() {
    let mut h = harness(
        vec![record("only", date(2019, 7, 4))],
        date(2024, 7, 4),
        Duration::from_secs(300),
    );
    h.sink.set_failing(true);
    assert_eq!(h.rotation.step().await, CycleOutcome::SinkFailed);
    assert!(h.log.entries().is_empty());

    h.sink.set_failing(false);
    assert_eq!(h.rotation.step().await, shown("only"));
    assert_eq!(h.log.entries().len(), 1);
}

#[tokio::test]
async fn display_log_outage_does_not_block_display() {
    let mut h = harness(
        vec![record("only", date(2019, 7, 4))],
        date(2024, 7, 4),
        Duration::from_secs(300),
    );
    h.log.set_failing(true);
    assert_eq!(h.rotation.step().await, shown("only"));
    assert_eq!(h.sink.len(), 1);
}

#[tokio::test]
async fn fallback_set_is_cycled() {
    let records: Vec<ImageRecord> = (2017..=2023)
        .map(|y| record(&format!("m17-{y}"), date(y, 3, 17)))
        .collect();
    let mut h = harness(records, date(2024, 3, 20), Duration::from_secs(300));
    let first = h.rotation.step().await;
    assert!(matches!(first, CycleOutcome::Shown { .. }));
    assert!(h.rotation.candidates().used_fallback);
    assert_eq!(h.rotation.candidates().len(), 5);
}

#[tokio::test]
async fn shuffle_command_cuts_wait_short() {
    let h = harness(
        vec![
            record("a", date(2011, 7, 4)),
            record("b", date(2012, 7, 4)),
            record("c", date(2013, 7, 4)),
        ],
        date(2024, 7, 4),
        Duration::from_secs(3600),
    );
    let sink = h.sink.clone();
    let (tx, rx) = mpsc::channel::<RotationCommand>(4);
    let cancel = CancellationToken::new();

    let driver = {
        let cancel = cancel.clone();
        let sink = sink.clone();
        async move {
            while sink.len() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tx.send(RotationCommand::Shuffle).await.unwrap();
            while sink.len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        }
    };

    let both = async { tokio::join!(h.rotation.run(rx, cancel.clone()), driver) };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(10), both)
        .await
        .expect("shuffle should interrupt the hour-long wait");
    result.unwrap();
    assert_eq!(sink.len(), 2);
}

#[tokio::test]
async fn cancellation_stops_idle_loop() {
    let h = harness(Vec::new(), date(2024, 7, 4), Duration::from_secs(3600));
    let (_tx, rx) = mpsc::channel::<RotationCommand>(1);
    let cancel = CancellationToken::new();
    let stopper = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        }
    };
    let both = async { tokio::join!(h.rotation.run(rx, cancel.clone()), stopper) };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(10), both)
        .await
        .expect("cancel should end the loop");
    result.unwrap();
}
