//! Configuration and Allow-List Tests
//!
//! Loads `provisioner.toml` and `devices.conf` from temporary files.
//!
//! Run with: `cargo test -p provisioner --test config_tests`

use provisioner::{AllowList, PortForward, ProvisionerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

// ============================================================================
// provisioner.toml
// ============================================================================

#[test]
fn test_load_partial_config_fills_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("provisioner.toml");
    std::fs::write(
        &path,
        r#"
[daemon]
log_level = "debug"
devices_file = "/etc/adb-provisioner/devices.conf"

[app]
package = "com.example.app"
apk_path = "/opt/apks/app.apk"

[forwarding]
ports = [9943, 9944, 9945]
"#,
    )
    .unwrap();

    let config = ProvisionerConfig::load(Some(path)).unwrap();

    assert_eq!(config.daemon.log_level, "debug");
    assert_eq!(
        config.devices_file(),
        PathBuf::from("/etc/adb-provisioner/devices.conf")
    );
    assert_eq!(config.adb.server_addr, "127.0.0.1:5037");

    let settings = config.provision_settings();
    assert_eq!(settings.package, "com.example.app");
    assert_eq!(settings.apk_path, PathBuf::from("/opt/apks/app.apk"));
    assert_eq!(settings.permission, "android.permission.RECORD_AUDIO");
    assert_eq!(
        settings.forwards,
        vec![
            PortForward::symmetric(9943),
            PortForward::symmetric(9944),
            PortForward::symmetric(9945),
        ]
    );
    assert_eq!(settings.metadata_retry.initial_backoff, Duration::from_millis(100));
    assert_eq!(settings.metadata_retry.max_backoff, Duration::from_secs(1));
    assert_eq!(settings.launch_settle, Duration::from_secs(1));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("provisioner.toml");

    std::fs::write(&path, "[forwarding]\nports = [0]\n").unwrap();
    assert!(ProvisionerConfig::load(Some(path.clone())).is_err());

    std::fs::write(&path, "[forwarding]\nports = []\n").unwrap();
    assert!(ProvisionerConfig::load(Some(path.clone())).is_err());

    std::fs::write(&path, "[app]\npackage = \"com.example.app && reboot\"\n").unwrap();
    assert!(ProvisionerConfig::load(Some(path.clone())).is_err());

    std::fs::write(&path, "[daemon\nlog_level = ").unwrap();
    assert!(ProvisionerConfig::load(Some(path)).is_err());
}

#[test]
fn test_missing_explicit_config_is_error() {
    let dir = tempdir().unwrap();
    assert!(ProvisionerConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_save_then_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("provisioner.toml");

    let mut config = ProvisionerConfig::default();
    config.adb.server_addr = "10.0.0.2:5037".to_string();
    config.timing.launch_settle_ms = 1500;
    config.save(&path).unwrap();

    let loaded = ProvisionerConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.adb.server_addr, "10.0.0.2:5037");
    assert_eq!(loaded.timing.launch_settle_ms, 1500);
    assert_eq!(loaded.app.package, config.app.package);
}

// ============================================================================
// devices.conf
// ============================================================================

#[test]
fn test_allow_list_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("devices.conf");
    std::fs::write(&path, "foo // comment\n// fullcomment\n\nbar\n").unwrap();

    let list = AllowList::load(&path).unwrap();

    assert_eq!(list.products(), ["foo", "bar"]);
    assert!(list.contains("foo"));
    assert!(list.contains("bar"));
    assert!(!list.contains("comment"));
    assert!(!list.contains("fullcomment"));
}

#[test]
fn test_missing_allow_list_is_empty() {
    let dir = tempdir().unwrap();

    let list = AllowList::load(&dir.path().join("devices.conf")).unwrap();

    assert!(list.is_empty());
    assert!(!list.contains("hollywood"));
}

#[test]
fn test_unreadable_allow_list_is_error() {
    let dir = tempdir().unwrap();

    // A directory cannot be read as a file
    assert!(AllowList::load(dir.path()).is_err());
}
