// tests/sources_config.rs
//
// Sources file lookup and parsing from disk.

use std::fs;
use std::path::PathBuf;

use serial_test::serial;
use tempfile::tempdir;

use headline_anchor::bootstrap::configured_sources;
use headline_anchor::config::AppConfig;
use headline_anchor::ingest::config::{load_sources_default, load_sources_from, ENV_PATH};

#[test]
fn loads_toml_file_by_extension() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sources.toml");
    fs::write(
        &path,
        r#"
[[sources]]
name = "Wire"
feed_url = "https://wire.test/rss"
poll_interval = 120

[[sources]]
name = "Wire again"
feed_url = "https://wire.test/rss"
"#,
    )
    .unwrap();

    let v = load_sources_from(&path).unwrap();
    assert_eq!(v.len(), 1);
    assert_eq!(v[0].poll_interval_secs, 120);
    assert!(v[0].enabled);
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    assert!(load_sources_from(&dir.path().join("nope.json")).is_err());
}

#[test]
#[serial]
fn env_path_wins_and_must_exist() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("feeds.json");
    fs::write(
        &path,
        r#"{"sources":[{"name":"Paper","url":"https://paper.test/atom","enabled":false}]}"#,
    )
    .unwrap();

    std::env::set_var(ENV_PATH, &path);
    let v = load_sources_default().unwrap();
    assert_eq!(v.len(), 1);
    assert_eq!(v[0].name, "Paper");
    assert!(!v[0].enabled);

    std::env::set_var(ENV_PATH, dir.path().join("gone.json"));
    assert!(load_sources_default().is_err());
    std::env::remove_var(ENV_PATH);
}

#[test]
#[serial]
fn app_config_path_is_used_verbatim() {
    std::env::remove_var(ENV_PATH);
    let dir = tempdir().unwrap();
    let path: PathBuf = dir.path().join("list.json");
    fs::write(
        &path,
        r#"[{"name":"Wire","feed_url":"https://wire.test/rss","pollInterval":5}]"#,
    )
    .unwrap();

    let cfg = AppConfig {
        sources_path: Some(path),
        ..AppConfig::default()
    };
    let v = configured_sources(&cfg).unwrap();
    assert_eq!(v.len(), 1);
    assert_eq!(v[0].poll_interval_secs, 30);
}
