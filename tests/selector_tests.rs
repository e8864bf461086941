use std::collections::BTreeSet;

use chrono::NaiveDate;
use memory_frame::config::SelectionOptions;
use memory_frame::device::DeviceId;
use memory_frame::display_log::DisplayLog;
use memory_frame::model::{DisplayLogEntry, ImageRecord, MonthDay};
use memory_frame::selector::Selector;
use memory_frame::store::memory::{MemoryCatalog, MemoryDisplayLog};

const DEVICE: &str = "frame-kitchen";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn record(id: &str, created: NaiveDate) -> ImageRecord {
    ImageRecord {
        storage_key: format!("photos/{id}.jpg"),
        id: id.to_string(),
        display_name: format!("{id}.jpg"),
        creation_date: created,
    }
}

fn seeded(seed: u64) -> SelectionOptions {
    SelectionOptions {
        shuffle_seed: Some(seed),
        ..SelectionOptions::default()
    }
}

fn selector(
    records: Vec<ImageRecord>,
    log: MemoryDisplayLog,
    options: SelectionOptions,
) -> Selector<MemoryCatalog, MemoryDisplayLog> {
    Selector::new(
        MemoryCatalog::new(records),
        DisplayLog::new(log),
        options,
        DeviceId::new(DEVICE),
    )
}

fn ids(records: &[ImageRecord]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

/// Seven photos taken on March 17th, 2017 through 2023.
fn march_17th_photos() -> Vec<ImageRecord> {
    (2017..=2023)
        .map(|year| record(&format!("m17-{year}"), date(year, 3, 17)))
        .collect()
}

#[tokio::test]
async fn same_day_returns_single_anniversary() {
    let mut sel = selector(
        vec![record("fireworks", date(2010, 7, 4))],
        MemoryDisplayLog::new(),
        seeded(1),
    );
    let set = sel.select_for_today(date(2024, 7, 4)).await;
    assert!(!set.used_fallback);
    assert_eq!(ids(&set.images), vec!["fireworks"]);
}

#[tokio::test]
async fn same_day_ignores_display_log_and_orders_newest_first() {
    let records = vec![
        record("a-2012", date(2012, 5, 1)),
        record("a-2020", date(2020, 5, 1)),
        record("a-2016", date(2016, 5, 1)),
        record("other-day", date(2020, 5, 2)),
    ];
    let today = date(2024, 5, 1);
    let log = MemoryDisplayLog::with_entries(
        ["a-2012", "a-2020", "a-2016"]
            .into_iter()
            .map(|id| DisplayLogEntry {
                image_id: id.to_string(),
                display_date: today,
                device_id: DEVICE.to_string(),
            })
            .collect(),
    );
    let mut sel = selector(records, log, seeded(1));
    let set = sel.select_for_today(today).await;
    assert!(!set.used_fallback);
    assert_eq!(ids(&set.images), vec!["a-2020", "a-2016", "a-2012"]);
}

#[tokio::test]
async fn fallback_caps_at_most_recent_five() {
    let mut sel = selector(march_17th_photos(), MemoryDisplayLog::new(), seeded(42));
    let set = sel.select_for_today(date(2024, 3, 20)).await;

    assert!(set.used_fallback);
    assert_eq!(set.len(), 5);
    let got: BTreeSet<&str> = ids(&set.images).into_iter().collect();
    let want: BTreeSet<&str> = ["m17-2023", "m17-2022", "m17-2021", "m17-2020", "m17-2019"]
        .into_iter()
        .collect();
    assert_eq!(got, want);
}

#[tokio::test]
async fn fallback_order_is_reproducible_with_a_seed() {
    let today = date(2024, 3, 20);
    let mut first = selector(march_17th_photos(), MemoryDisplayLog::new(), seeded(7));
    let mut second = selector(march_17th_photos(), MemoryDisplayLog::new(), seeded(7));
    let a = first.select_for_today(today).await;
    let b = second.select_for_today(today).await;
    assert_eq!(a, b);
}

#[tokio::test]
async fn reshuffle_keeps_membership() {
    let mut sel = selector(march_17th_photos(), MemoryDisplayLog::new(), seeded(3));
    let mut set = sel.select_for_today(date(2024, 3, 20)).await;
    let before: BTreeSet<String> = set.images.iter().map(|r| r.id.clone()).collect();
    sel.reshuffle(&mut set);
    let after: BTreeSet<String> = set.images.iter().map(|r| r.id.clone()).collect();
    assert_eq!(before, after);
    assert!(set.used_fallback);
}

#[tokio::test]
async fn recently_shown_fallback_images_are_skipped() {
    let today = date(2024, 3, 20);
    let log = MemoryDisplayLog::with_entries(vec![
        // Inside the 10-day window: excluded.
        DisplayLogEntry {
            image_id: "m17-2023".to_string(),
            display_date: date(2024, 3, 10),
            device_id: DEVICE.to_string(),
        },
        // Outside the window: still eligible.
        DisplayLogEntry {
            image_id: "m17-2022".to_string(),
            display_date: date(2024, 3, 9),
            device_id: DEVICE.to_string(),
        },
        // Another frame's history does not count.
        DisplayLogEntry {
            image_id: "m17-2021".to_string(),
            display_date: date(2024, 3, 19),
            device_id: "frame-hallway".to_string(),
        },
    ]);
    let mut sel = selector(march_17th_photos(), log, seeded(5));
    let set = sel.select_for_today(today).await;

    let got: BTreeSet<&str> = ids(&set.images).into_iter().collect();
    let want: BTreeSet<&str> = ["m17-2022", "m17-2021", "m17-2020", "m17-2019", "m17-2018"]
        .into_iter()
        .collect();
    assert_eq!(got, want);
}

#[tokio::test]
async fn fully_shown_day_falls_through_to_earlier_day() {
    let today = date(2024, 3, 20);
    let records = vec![
        record("yesterday", date(2019, 3, 19)),
        record("older", date(2015, 3, 16)),
    ];
    let log = MemoryDisplayLog::with_entries(vec![DisplayLogEntry {
        image_id: "yesterday".to_string(),
        display_date: date(2024, 3, 19),
        device_id: DEVICE.to_string(),
    }]);
    let mut sel = selector(records, log, seeded(5));
    let set = sel.select_for_today(today).await;
    assert!(set.used_fallback);
    assert_eq!(ids(&set.images), vec!["older"]);
}

#[tokio::test]
async fn catalog_outage_on_one_day_continues_the_walk() {
    let catalog = MemoryCatalog::new(vec![record("two-days", date(2020, 3, 18))]);
    catalog.fail_on(MonthDay::new(3, 20).unwrap());
    catalog.fail_on(MonthDay::new(3, 19).unwrap());
    let mut sel = Selector::new(
        catalog,
        DisplayLog::new(MemoryDisplayLog::new()),
        seeded(1),
        DeviceId::new(DEVICE),
    );
    let set = sel.select_for_today(date(2024, 3, 20)).await;
    assert!(set.used_fallback);
    assert_eq!(ids(&set.images), vec!["two-days"]);
}

#[tokio::test]
async fn display_log_outage_keeps_images_eligible() {
    let log = MemoryDisplayLog::new();
    log.set_failing(true);
    let mut sel = selector(march_17th_photos(), log, seeded(9));
    let set = sel.select_for_today(date(2024, 3, 20)).await;
    assert_eq!(set.len(), 5);
}

#[tokio::test]
async fn nothing_within_horizon_is_empty() {
    let options = SelectionOptions {
        fallback_horizon_days: 30,
        ..seeded(1)
    };
    // 31 days before 2024-03-20.
    let mut sel = selector(
        vec![record("too-old", date(2020, 2, 18))],
        MemoryDisplayLog::new(),
        options,
    );
    let set = sel.select_for_today(date(2024, 3, 20)).await;
    assert!(set.is_empty());
    assert!(!set.used_fallback);
}

#[tokio::test]
async fn leap_day_matches_leap_day() {
    let mut sel = selector(
        vec![record("leap", date(2020, 2, 29))],
        MemoryDisplayLog::new(),
        seeded(1),
    );
    let set = sel.select_for_today(date(2024, 2, 29)).await;
    assert!(!set.used_fallback);
    assert_eq!(ids(&set.images), vec!["leap"]);
}

#[tokio::test]
async fn records_without_storage_key_are_never_selected() {
    let mut keyless = record("keyless", date(2012, 6, 1));
    keyless.storage_key = String::new();
    let mut sel = selector(
        vec![keyless, record("keyed", date(2011, 6, 1))],
        MemoryDisplayLog::new(),
        seeded(1),
    );
    let set = sel.select_for_today(date(2024, 6, 1)).await;
    assert_eq!(ids(&set.images), vec!["keyed"]);
}
