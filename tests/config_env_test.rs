//! Configuration loading through the real environment.

use std::env;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use mixer_chat::Config;
use tempfile::TempDir;

// Tests in this file mutate process-wide environment variables.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: [&str; 6] = [
    "MIXER_CHAT_CONFIG_DIR",
    "MIXER_CHAT_BASE_PATH",
    "MIXER_CHAT_TOKEN",
    "MIXER_CHAT_WORKERS",
    "MIXER_CHAT_RECONNECT",
    "MIXER_CHAT_MAX_RECONNECTS",
];

fn setup_test_env() -> (TempDir, MutexGuard<'static, ()>) {
    let guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let temp_dir = TempDir::new().unwrap();
    for var in VARS {
        env::remove_var(var);
    }
    env::set_var("MIXER_CHAT_CONFIG_DIR", temp_dir.path());
    (temp_dir, guard)
}

#[test]
fn test_load_defaults_without_file() {
    let (_dir, _guard) = setup_test_env();
    assert_eq!(Config::load().unwrap(), Config::default());
}

#[test]
fn test_env_overrides_file() {
    let (dir, _guard) = setup_test_env();
    fs::write(
        dir.path().join("config.json"),
        r#"{"base_path": "http://from-file/api/v1/", "worker_threads": 4}"#,
    )
    .unwrap();
    env::set_var("MIXER_CHAT_BASE_PATH", "http://from-env/api/v1/");
    env::set_var("MIXER_CHAT_RECONNECT", "false");

    let config = Config::load().unwrap();

    assert_eq!(config.base_path, "http://from-env/api/v1/");
    assert_eq!(config.worker_threads, 4);
    assert!(!config.reconnect);
}

#[test]
fn test_save_writes_into_config_dir() {
    let (dir, _guard) = setup_test_env();
    let config = Config {
        worker_threads: 2,
        ..Config::default()
    };
    config.save().unwrap();

    assert!(dir.path().join("config.json").exists());
    assert_eq!(Config::load().unwrap(), config);
}
