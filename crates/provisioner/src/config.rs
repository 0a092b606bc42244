//! Provisioner configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::{PortForward, ProvisionSettings, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvisionerConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub forwarding: ForwardingSettings,
    #[serde(default)]
    pub timing: TimingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "DaemonSettings::default_log_level")]
    pub log_level: String,
    /// Allow-list file, one product identifier per line
    #[serde(default = "DaemonSettings::default_devices_file")]
    pub devices_file: PathBuf,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            devices_file: Self::default_devices_file(),
        }
    }
}

impl DaemonSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_devices_file() -> PathBuf {
        PathBuf::from("devices.conf")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdbSettings {
    /// Address of the running ADB server
    #[serde(default = "AdbSettings::default_server_addr")]
    pub server_addr: String,
}

impl Default for AdbSettings {
    fn default() -> Self {
        Self {
            server_addr: Self::default_server_addr(),
        }
    }
}

impl AdbSettings {
    fn default_server_addr() -> String {
        "127.0.0.1:5037".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Android package name of the companion app
    #[serde(default = "AppSettings::default_package")]
    pub package: String,
    /// Installer artifact; defaults to `../<package>.apk`
    #[serde(default)]
    pub apk_path: Option<PathBuf>,
    /// Runtime permission granted after install
    #[serde(default = "AppSettings::default_permission")]
    pub permission: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            package: Self::default_package(),
            apk_path: None,
            permission: Self::default_permission(),
        }
    }
}

impl AppSettings {
    fn default_package() -> String {
        "alvr.client.stable".to_string()
    }

    fn default_permission() -> String {
        "android.permission.RECORD_AUDIO".to_string()
    }

    /// Resolved installer path, with `~` expanded
    pub fn resolved_apk_path(&self) -> PathBuf {
        match &self.apk_path {
            Some(path) => expand_path(path),
            None => PathBuf::from("..").join(format!("{}.apk", self.package)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingSettings {
    /// Ports forwarded host -> device, same number on both sides
    #[serde(default = "ForwardingSettings::default_ports")]
    pub ports: Vec<u16>,
}

impl Default for ForwardingSettings {
    fn default() -> Self {
        Self {
            ports: Self::default_ports(),
        }
    }
}

impl ForwardingSettings {
    fn default_ports() -> Vec<u16> {
        vec![9943, 9944]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Give up resolving device metadata after this long
    #[serde(default = "TimingSettings::default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    /// First wait between registry polls
    #[serde(default = "TimingSettings::default_metadata_initial_backoff_ms")]
    pub metadata_initial_backoff_ms: u64,
    /// Longest wait between registry polls
    #[serde(default = "TimingSettings::default_metadata_max_backoff_ms")]
    pub metadata_max_backoff_ms: u64,
    /// Pause between creating forwards and launching the app
    #[serde(default = "TimingSettings::default_launch_settle_ms")]
    pub launch_settle_ms: u64,
    /// Cap on the watcher's reconnect backoff
    #[serde(default = "TimingSettings::default_watcher_max_backoff_ms")]
    pub watcher_max_backoff_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            metadata_timeout_ms: Self::default_metadata_timeout_ms(),
            metadata_initial_backoff_ms: Self::default_metadata_initial_backoff_ms(),
            metadata_max_backoff_ms: Self::default_metadata_max_backoff_ms(),
            launch_settle_ms: Self::default_launch_settle_ms(),
            watcher_max_backoff_ms: Self::default_watcher_max_backoff_ms(),
        }
    }
}

impl TimingSettings {
    fn default_metadata_timeout_ms() -> u64 {
        3000
    }

    fn default_metadata_initial_backoff_ms() -> u64 {
        100
    }

    fn default_metadata_max_backoff_ms() -> u64 {
        1000
    }

    fn default_launch_settle_ms() -> u64 {
        1000
    }

    fn default_watcher_max_backoff_ms() -> u64 {
        5000
    }
}

impl ProvisionerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/adb-provisioner/provisioner.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ProvisionerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("adb-provisioner").join("provisioner.toml")
        } else {
            PathBuf::from(".config/adb-provisioner/provisioner.toml")
        }
    }

    /// Allow-list path with `~` expanded
    pub fn devices_file(&self) -> PathBuf {
        expand_path(&self.daemon.devices_file)
    }

    /// Build the per-attempt workflow settings
    pub fn provision_settings(&self) -> ProvisionSettings {
        ProvisionSettings {
            package: self.app.package.clone(),
            apk_path: self.app.resolved_apk_path(),
            permission: self.app.permission.clone(),
            forwards: self
                .forwarding
                .ports
                .iter()
                .map(|&port| PortForward::symmetric(port))
                .collect(),
            metadata_retry: RetryPolicy {
                initial_backoff: Duration::from_millis(self.timing.metadata_initial_backoff_ms),
                max_backoff: Duration::from_millis(self.timing.metadata_max_backoff_ms),
                timeout: Duration::from_millis(self.timing.metadata_timeout_ms),
            },
            launch_settle: Duration::from_millis(self.timing.launch_settle_ms),
        }
    }

    /// Apply command line overrides and re-check the result
    pub fn apply_overrides(
        &mut self,
        devices_file: Option<PathBuf>,
        server_addr: Option<String>,
        log_level: Option<String>,
    ) -> Result<()> {
        if let Some(devices) = devices_file {
            self.daemon.devices_file = devices;
        }
        if let Some(addr) = server_addr {
            self.adb.server_addr = addr;
        }
        if let Some(level) = log_level {
            self.daemon.log_level = level;
        }

        self.validate()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.daemon.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.daemon.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.adb.server_addr.trim().is_empty() {
            return Err(anyhow!("adb.server_addr must not be empty"));
        }

        Self::validate_package(&self.app.package)?;

        if self.app.permission.trim().is_empty() {
            return Err(anyhow!("app.permission must not be empty"));
        }

        if self.forwarding.ports.is_empty() {
            return Err(anyhow!("forwarding.ports must list at least one port"));
        }

        if self.forwarding.ports.contains(&0) {
            return Err(anyhow!("forwarding.ports must not contain port 0"));
        }

        if self.timing.metadata_initial_backoff_ms == 0 {
            return Err(anyhow!("timing.metadata_initial_backoff_ms must be greater than 0"));
        }

        if self.timing.metadata_max_backoff_ms < self.timing.metadata_initial_backoff_ms {
            return Err(anyhow!(
                "timing.metadata_max_backoff_ms ({}) is below metadata_initial_backoff_ms ({})",
                self.timing.metadata_max_backoff_ms,
                self.timing.metadata_initial_backoff_ms
            ));
        }

        Ok(())
    }

    /// Package names are dot-separated Java identifiers; they end up inside
    /// shell commands, so nothing else is accepted
    fn validate_package(package: &str) -> Result<()> {
        if package.is_empty() {
            return Err(anyhow!("app.package must not be empty"));
        }

        let valid = package.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

        if !valid {
            return Err(anyhow!("Invalid package name '{}'", package));
        }

        Ok(())
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.adb.server_addr, "127.0.0.1:5037");
        assert_eq!(config.forwarding.ports, vec![9943, 9944]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_apk_path_is_relative_to_parent() {
        let config = ProvisionerConfig::default();
        assert_eq!(
            config.app.resolved_apk_path(),
            PathBuf::from("../alvr.client.stable.apk")
        );
    }

    #[test]
    fn test_validate_package() {
        assert!(ProvisionerConfig::validate_package("com.example.app").is_ok());
        assert!(ProvisionerConfig::validate_package("a_b.c1").is_ok());
        assert!(ProvisionerConfig::validate_package("").is_err());
        assert!(ProvisionerConfig::validate_package("com..app").is_err());
        assert!(ProvisionerConfig::validate_package("com.1app").is_err());
        assert!(ProvisionerConfig::validate_package("com.app; reboot").is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = ProvisionerConfig::default();
        config.daemon.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        config.daemon.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_ports() {
        let mut config = ProvisionerConfig::default();
        config.forwarding.ports.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least one port"));
    }

    #[test]
    fn test_overrides_are_validated() {
        let mut config = ProvisionerConfig::default();
        assert!(
            config
                .apply_overrides(None, None, Some("loud".to_string()))
                .is_err()
        );

        let mut config = ProvisionerConfig::default();
        config
            .apply_overrides(
                Some(PathBuf::from("/etc/provisioner/devices.conf")),
                Some("10.0.0.2:5037".to_string()),
                Some("trace".to_string()),
            )
            .unwrap();
        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(config.adb.server_addr, "10.0.0.2:5037");
        assert_eq!(
            config.devices_file(),
            PathBuf::from("/etc/provisioner/devices.conf")
        );
    }

    #[test]
    fn test_provision_settings_from_config() {
        let mut config = ProvisionerConfig::default();
        config.timing.launch_settle_ms = 250;
        let settings = config.provision_settings();

        assert_eq!(settings.forwards.len(), 2);
        assert_eq!(settings.forwards[0], PortForward::symmetric(9943));
        assert_eq!(settings.launch_settle, Duration::from_millis(250));
        assert_eq!(settings.metadata_retry.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_config_serialization() {
        let config = ProvisionerConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ProvisionerConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.app.package, parsed.app.package);
        assert_eq!(config.forwarding.ports, parsed.forwarding.ports);
    }
}
