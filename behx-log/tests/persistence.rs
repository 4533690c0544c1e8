use behx_core::{FieldValue, Fields};
use behx_log::{parse_flat, ColumnarStore, EventLog, LogError, LogOutput};
use behx_timing::ManualClock;
use std::time::Duration;

fn session(clock: &ManualClock) -> EventLog<ManualClock> {
    let mut log = EventLog::new(clock.clone());
    log.set_time().unwrap();
    clock.advance(Duration::from_millis(2_000));
    log.append("Washout_Finished", Fields::new().with("Duration", 2.0))
        .unwrap();
    clock.advance(Duration::from_nanos(7_654_321_123));
    log.append(
        "Questionnaire_AnswerConfirmed",
        Fields::new()
            .with("Question", "How intense, overall?")
            .with("Answer", 4),
    )
    .unwrap();
    log
}

#[test]
fn flat_round_trip_recovers_fields_and_times() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("S01_1.csv");
    let clock = ManualClock::default();
    let mut log = session(&clock);
    log.open(LogOutput::Flat(path.clone())).unwrap();
    assert_eq!(log.persist().unwrap(), path);

    let text = std::fs::read_to_string(&path).unwrap();
    let rows = parse_flat(&text).unwrap();
    assert_eq!(rows.len(), log.len());

    for (row, record) in rows.iter().zip(log.records()) {
        let names: Vec<_> = row.names().collect();
        let expected: Vec<_> = record.cells().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, expected);
        assert_eq!(row.kind(), Some(record.kind.as_str()));

        let time: f64 = row.get("Time").unwrap().parse().unwrap();
        assert!((time - FieldValue::posix_seconds(&record.time)).abs() < 1e-6);
        let delta: f64 = row.get("DeltaTime").unwrap().parse().unwrap();
        assert!((delta - record.delta_seconds()).abs() < 1e-6);
    }
    assert_eq!(rows[2].get("Question"), Some("How intense, overall?"));
    assert_eq!(rows[2].get("Answer"), Some("4"));
}

#[test]
fn columnar_output_is_written_through() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("S01_1.sqlite");
    let clock = ManualClock::default();

    let mut log = EventLog::new(clock.clone());
    log.set_attribute("Subject", "S01").unwrap();
    log.open(LogOutput::Columnar(path.clone())).unwrap();
    log.set_time().unwrap();
    clock.advance(Duration::from_millis(10));
    log.append("Skip", Fields::new().with("Video", "b.mp4"))
        .unwrap();

    // Read through a second connection while the log still holds the file.
    let reader = ColumnarStore::open(&path).unwrap();
    let kinds: Vec<_> = reader
        .events()
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, ["TimeSet", "Skip"]);
    assert_eq!(
        reader.columns("Skip").unwrap(),
        ["TypeIndex", "Time", "DeltaTime", "Video"]
    );
    assert!(reader.attribute("Subject").unwrap().is_some());
    assert!(reader.attribute("FileType").unwrap().is_some());
}

#[test]
fn flat_save_failure_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::default();
    let log = session(&clock);
    let missing = dir.path().join("no-such-dir").join("log.csv");
    assert!(log.save(&missing).is_err());
}

#[test]
fn store_failure_keeps_the_record_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("S01_1.sqlite");
    let clock = ManualClock::default();
    let mut log = EventLog::new(clock.clone());
    log.open(LogOutput::Columnar(path.clone())).unwrap();
    log.set_time().unwrap();

    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch("DROP TABLE Event")
        .unwrap();
    clock.advance(Duration::from_millis(5));
    let err = log
        .append("Skip", Fields::new().with("Video", "a.mp4"))
        .unwrap_err();

    assert!(matches!(err, LogError::Store(_)));
    assert_eq!(log.len(), 2);
    assert_eq!(log.records().last().map(|r| r.kind.as_str()), Some("Skip"));
}
