use strata::model::decode_value;
use strata::{OpenMode, Series, SeriesConfig, StoreError};

fn config(slot_duration: u32) -> SeriesConfig {
    SeriesConfig::new(slot_duration)
}

// aligned to a 60s slot duration
const T: u32 = 1_700_000_040;

#[test]
fn create_write_reopen_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fine.db");

    let mut series = Series::open(&path, OpenMode::Create, config(60)).unwrap();
    series.goto_epoch(T, false, true).unwrap();
    series.set_by_key("m-1", &[7]).unwrap();
    series.set_by_key("m-2", &[42]).unwrap();
    series.close().unwrap();

    let mut series = Series::open(&path, OpenMode::ReadOnly, config(60)).unwrap();
    series.goto_epoch(T, true, false).unwrap();

    assert_eq!(decode_value(series.get_by_key("m-2").unwrap()), 42);
    assert_eq!(decode_value(series.get_by_key("m-1").unwrap()), 7);
}

#[test]
fn rejects_writes_into_the_past() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fine.db");

    let mut series = Series::open(&path, OpenMode::Create, config(60)).unwrap();
    series.goto_epoch(T, false, true).unwrap();
    series.set_by_key("m-1", &[1]).unwrap();
    series.flush().unwrap();

    assert!(matches!(
        series.goto_epoch(T - 60, false, true),
        Err(StoreError::NotFound)
    ));
}

#[test]
fn loading_a_stored_past_epoch_is_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fine.db");

    let mut series = Series::open(&path, OpenMode::Create, config(60)).unwrap();
    series.goto_epoch(T, false, true).unwrap();
    series.set_by_key("m-1", &[1]).unwrap();
    series.goto_epoch(T + 60, false, true).unwrap();
    series.set_by_key("m-1", &[2]).unwrap();
    series.flush().unwrap();

    series.goto_epoch(T, true, false).unwrap();
    assert_eq!(decode_value(series.get_by_key("m-1").unwrap()), 1);
}

#[test]
fn reopen_append_preserves_indices() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fine.db");

    let mut series = Series::open(&path, OpenMode::Create, config(60)).unwrap();
    series.goto_epoch(T, false, true).unwrap();
    series.set_by_key("a", &[1]).unwrap();
    series.set_by_key("b", &[2]).unwrap();
    series.set_by_key("c", &[3]).unwrap();
    series.close().unwrap();

    // the requested slot duration is ignored once the store exists
    let mut series = Series::open(&path, OpenMode::Append, config(999)).unwrap();
    assert_eq!(series.slot_duration(), 60);
    assert_eq!(series.lowest_free_index(), 3);

    series.goto_epoch(T + 60, false, true).unwrap();
    series.set_by_key("d", &[4]).unwrap();

    assert_eq!(series.metric_index("a").unwrap(), Some(0));
    assert_eq!(series.metric_index("b").unwrap(), Some(1));
    assert_eq!(series.metric_index("c").unwrap(), Some(2));
    assert_eq!(series.metric_index("d").unwrap(), Some(3));
    assert_eq!(series.lowest_free_index(), 4);
}

#[test]
fn append_to_a_missing_store_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.db");

    assert!(Series::open(&path, OpenMode::Append, config(60)).is_err());
}

#[test]
fn epoch_list_stays_sorted_across_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fine.db");

    let mut series = Series::open(&path, OpenMode::Create, config(60)).unwrap();

    for (epoch, value) in [(T, 1), (T + 60, 2), (T + 240, 3)] {
        series.goto_epoch(epoch, false, true).unwrap();
        series.set_by_key("m-1", &[value]).unwrap();
    }
    series.flush().unwrap();

    assert_eq!(series.epoch_list(), &[T, T + 60, T + 240]);
    assert_eq!(series.most_recent_epoch(), Some(T + 240));

    // the skipped epoch was never stored
    assert!(!series.epoch_exists(T + 120).unwrap());
    assert!(series.epoch_exists(T + 240).unwrap());
}

#[test]
fn values_survive_many_epoch_switches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fine.db");

    let mut series = Series::open(&path, OpenMode::Create, config(60)).unwrap();

    for i in 0..10u64 {
        let epoch = T + 60 * i as u32;
        series.goto_epoch(epoch, false, true).unwrap();
        series.set_by_key("m-1", &[i * 10]).unwrap();
        series.set_by_key("m-2", &[i * 100]).unwrap();
    }
    series.flush().unwrap();

    for i in 0..10u64 {
        let epoch = T + 60 * i as u32;
        series.goto_epoch(epoch, true, false).unwrap();
        assert_eq!(decode_value(series.get_by_key("m-1").unwrap()), i * 10);
        assert_eq!(decode_value(series.get_by_key("m-2").unwrap()), i * 100);
    }
}

#[test]
fn tags_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fine.db");

    let mut series = Series::open(&path, OpenMode::Create, config(60)).unwrap();
    series.goto_epoch(T, false, true).unwrap();
    series.set_by_key("eth0", &[1]).unwrap();
    series.set_by_key("eth1", &[2]).unwrap();
    series.set_by_key("lo", &[3]).unwrap();

    series.tag_metric("eth0", "physical").unwrap();
    series.tag_metric("eth1", "physical").unwrap();
    series.tag_metric("lo", "loopback").unwrap();
    series.close().unwrap();

    let series = Series::open(&path, OpenMode::ReadOnly, config(60)).unwrap();

    assert_eq!(series.tag_indices("physical", 100).unwrap(), vec![0, 1]);
    assert_eq!(series.tag_indices("loopback", 100).unwrap(), vec![2]);
    assert!(matches!(
        series.tag_indices("virtual", 100),
        Err(StoreError::NotFound)
    ));
}

#[test]
fn read_only_store_rejects_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fine.db");

    let mut series = Series::open(&path, OpenMode::Create, config(60)).unwrap();
    series.goto_epoch(T, false, true).unwrap();
    series.set_by_key("m-1", &[1]).unwrap();
    series.close().unwrap();

    let mut series = Series::open(&path, OpenMode::ReadOnly, config(60)).unwrap();
    series.goto_epoch(T, true, false).unwrap();

    // rejected for fresh keys, already-mapped keys and raw indices alike
    assert!(matches!(
        series.set_by_key("m-2", &[2]),
        Err(StoreError::ReadOnly)
    ));
    assert!(matches!(
        series.set_by_key("m-1", &[9]),
        Err(StoreError::ReadOnly)
    ));
    assert!(matches!(
        series.set_by_index(0, &[9]),
        Err(StoreError::ReadOnly)
    ));

    // reading still works and the chunk is untouched
    assert_eq!(decode_value(series.get_by_key("m-1").unwrap()), 1);
}

#[test]
fn unknown_fill_pattern_is_reported_for_untouched_slots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fine.db");

    let config = SeriesConfig {
        slot_duration: 60,
        values_per_entry: 1,
        unknown_fill: 0xFF,
    };

    let mut series = Series::open(&path, OpenMode::Create, config).unwrap();
    series.goto_epoch(T, false, true).unwrap();
    series.set_by_key("a", &[1]).unwrap();
    series.set_by_key("b", &[2]).unwrap();

    series.goto_epoch(T + 60, false, true).unwrap();
    series.set_by_key("c", &[3]).unwrap();
    series.flush().unwrap();

    // in the second epoch, columns a and b were never written
    series.goto_epoch(T + 60, true, false).unwrap();
    assert_eq!(
        decode_value(series.get_by_index(0).unwrap()),
        series.unknown_value()
    );
    assert_eq!(series.unknown_value(), u64::MAX);
    assert_eq!(decode_value(series.get_by_key("c").unwrap()), 3);
}
