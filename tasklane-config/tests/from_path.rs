use std::io::Write;

use similar_asserts::assert_eq;
use tasklane_config::{Config, ConfigErrorKind};

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "queue:\n  capacity: 8\nbuffer:\n  chunk_size: 64").unwrap();

    let config = Config::from_path(file.path()).unwrap();
    assert_eq!(config.queue.capacity, 8);
    assert_eq!(config.buffer.chunk_size, 64);
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yml");

    let error = Config::from_path(&path).unwrap_err();
    assert_eq!(error.kind(), ConfigErrorKind::CouldNotOpenFile);
    assert!(error.to_string().contains(&path.display().to_string()));
}

#[test]
fn test_invalid_value_in_file_reports_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "queue:\n  capacity: 0").unwrap();

    let error = Config::from_path(file.path()).unwrap_err();
    assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
    let message = error.to_string();
    assert!(message.starts_with("invalid config value (field queue.capacity in file "));
    assert!(message.contains(&file.path().display().to_string()));
}
