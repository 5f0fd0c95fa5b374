//! Daemon log setup: guard ownership, directory creation, daily JSON file.

use btrescue::logging::{LoggingGuard, LOG_FILE_PREFIX};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn daemon_logging_writes_daily_json_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // The global subscriber can only be installed once per process; this is
    // the only test in this binary that installs one.
    let guard = btrescue::logging::init_production(&logs_dir).expect("should init logging");
    assert!(logs_dir.exists(), "logs directory should be created");
    tracing::info!(device = "hci0", "hardware error detected");
    drop(guard);

    let files: Vec<_> = std::fs::read_dir(&logs_dir)
        .expect("logs dir readable")
        .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files.len(), 1, "files: {files:?}");
    assert!(files[0].starts_with(LOG_FILE_PREFIX), "files: {files:?}");

    let contents =
        std::fs::read_to_string(logs_dir.join(&files[0])).expect("log file readable");
    assert!(contents.contains("\"message\":\"hardware error detected\""), "{contents}");
    assert!(contents.contains("\"device\":\"hci0\""), "{contents}");
}
