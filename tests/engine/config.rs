//! Starting an engine from a `tailor.toml` file

use tailordb::engine::CONFIG_FILE_NAME;
use tempfile::TempDir;

use crate::common::*;

#[test]
fn engine_starts_from_default_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    EngineConfig::write_default_if_missing(&path).unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config, EngineConfig::default());

    let engine = Engine::new(write_skew(), config).unwrap();
    assert_eq!(engine.current_protocol(), IsolationProtocol::Ser);
    assert_eq!(engine.lock_table().relations().len(), 2);
}

#[test]
fn edited_file_selects_protocol_and_wait_policy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        "initial_protocol = \"rc\"\nbucket_count = 8\n\n[lock_wait]\nmax_retries = 3\n",
    )
    .unwrap();
    // an existing file is left alone
    EngineConfig::write_default_if_missing(&path).unwrap();

    let engine = Engine::new(write_skew(), EngineConfig::from_file(&path).unwrap()).unwrap();
    assert_eq!(engine.current_protocol(), IsolationProtocol::RcTailor);
    let locks = engine.lock_table().config();
    assert_eq!(locks.bucket_count, 8);
    assert_eq!(locks.wait.max_retries, 3);

    let store = MemoryStore::new();
    let conn = store.connect();
    let conn_id = conn.id();
    let _worker = engine.connect(WorkerId(1), Box::new(conn)).unwrap();
    assert_eq!(store.isolation_of(conn_id), Some(IsolationLevel::ReadCommitted));
}

#[test]
fn bad_files_are_rejected() {
    let dir = TempDir::new().unwrap();

    let unknown = dir.path().join("unknown.toml");
    std::fs::write(&unknown, "initial_protocol = \"snapshot\"\n").unwrap();
    assert!(matches!(
        EngineConfig::from_file(&unknown),
        Err(TailorError::InvalidInput { .. })
    ));

    let zero = dir.path().join("zero.toml");
    std::fs::write(&zero, "bucket_count = 0\n").unwrap();
    assert!(EngineConfig::from_file(&zero).is_err());

    assert!(EngineConfig::from_file(&dir.path().join("missing.toml")).is_err());

    let mut config = EngineConfig::default();
    config.switch.poll_interval_ms = 0;
    assert!(matches!(
        Engine::new(write_skew(), config),
        Err(TailorError::InvalidInput { .. })
    ));
}
