//! Per-device provisioning workflow
//!
//! One `Connected` event drives one [`ProvisioningAttempt`] through
//!
//! 1. **Resolve**: poll the registry until the device reports a product,
//!    then check it against the allow-list
//! 2. **Reinstall** (only if the APK artifact exists): force-stop, clear,
//!    install with replace semantics
//! 3. **GrantPermission**: after a successful install; failure is only logged
//! 4. **Forward**: create every configured TCP forward
//! 5. **Launch**: wait for the forwards to settle, then start the app
//!
//! Steps run strictly in this order. An attempt ends as soon as one step
//! fails; nothing is retried and nothing is rolled back. A later physical
//! reconnect starts a fresh attempt.

use crate::allow_list::AllowList;
use crate::bridge::{CommandExecutor, DeviceRegistry};
use protocol::{DeviceInfo, DeviceSerial};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Host port -> device port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortForward {
    pub local: u16,
    pub remote: u16,
}

impl PortForward {
    /// Same port number on both sides
    pub fn symmetric(port: u16) -> Self {
        Self {
            local: port,
            remote: port,
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Total time after which polling gives up
    pub timeout: Duration,
}

/// Everything an attempt needs besides the bridge and the allow-list
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub package: String,
    pub apk_path: PathBuf,
    pub permission: String,
    pub forwards: Vec<PortForward>,
    pub metadata_retry: RetryPolicy,
    pub launch_settle: Duration,
}

impl ProvisionSettings {
    pub fn force_stop_command(&self) -> String {
        format!("am force-stop {}", self.package)
    }

    pub fn clear_data_command(&self) -> String {
        format!("pm clear {}", self.package)
    }

    pub fn grant_permission_command(&self) -> String {
        format!("pm grant {} {}", self.package, self.permission)
    }

    /// Single monkey event: enough to bring the launcher activity up
    pub fn launch_command(&self) -> String {
        format!("monkey -p {} 1", self.package)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    Resolve,
    Reinstall,
    GrantPermission,
    Forward,
    Launch,
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolve => "resolve",
            Self::Reinstall => "reinstall",
            Self::GrantPermission => "grant-permission",
            Self::Forward => "forward",
            Self::Launch => "launch",
        };
        f.write_str(name)
    }
}

/// Which part of the reinstall step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Stop,
    Clear,
    Install,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stop => "force-stop",
            Self::Clear => "clear",
            Self::Install => "install",
        };
        f.write_str(name)
    }
}

/// Terminal failure of one attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Install failed at {stage} stage: {message}")]
    InstallFailed { stage: InstallStage, message: String },

    #[error("Forward tcp:{local} -> tcp:{remote} failed: {message}")]
    ForwardFailed {
        local: u16,
        remote: u16,
        message: String,
    },

    #[error("Launch failed: {message}")]
    LaunchFailed { message: String },
}

impl ProvisionError {
    /// Step the attempt was in when it failed
    pub fn step(&self) -> ProvisioningStep {
        match self {
            Self::InstallFailed { .. } => ProvisioningStep::Reinstall,
            Self::ForwardFailed { .. } => ProvisioningStep::Forward,
            Self::LaunchFailed { .. } => ProvisioningStep::Launch,
        }
    }
}

/// Why an attempt ended without doing anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Product not allow-listed (empty product included)
    Ineligible { product: String },
    /// Device never showed up in the registry
    MetadataUnresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Skipped(SkipReason),
    Failed(ProvisionError),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Record of one run of the workflow for one connect event
#[derive(Debug, Clone)]
pub struct ProvisioningAttempt {
    pub serial: DeviceSerial,
    /// Product as resolved from the registry, if the device was found
    pub product: Option<String>,
    /// Last step entered
    pub step: ProvisioningStep,
    pub outcome: AttemptOutcome,
}

/// Runs the workflow against an injected bridge
pub struct Orchestrator<B> {
    bridge: Arc<B>,
    allow_list: Arc<AllowList>,
    settings: Arc<ProvisionSettings>,
}

impl<B> Clone for Orchestrator<B> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
            allow_list: Arc::clone(&self.allow_list),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<B> Orchestrator<B>
where
    B: DeviceRegistry + CommandExecutor,
{
    pub fn new(bridge: Arc<B>, allow_list: Arc<AllowList>, settings: Arc<ProvisionSettings>) -> Self {
        Self {
            bridge,
            allow_list,
            settings,
        }
    }

    pub fn settings(&self) -> &ProvisionSettings {
        &self.settings
    }

    /// Run one complete attempt for `serial`
    pub async fn provision(&self, serial: DeviceSerial) -> ProvisioningAttempt {
        let mut attempt = ProvisioningAttempt {
            serial,
            product: None,
            step: ProvisioningStep::Resolve,
            outcome: AttemptOutcome::Success,
        };

        attempt.outcome = self.run_steps(&mut attempt).await;
        log_outcome(&attempt);
        attempt
    }

    async fn run_steps(&self, attempt: &mut ProvisioningAttempt) -> AttemptOutcome {
        let serial = attempt.serial.clone();

        let Some(info) = self.resolve(&serial).await else {
            return AttemptOutcome::Skipped(SkipReason::MetadataUnresolved);
        };
        attempt.product = Some(info.product.clone());

        if !self.allow_list.contains(&info.product) {
            return AttemptOutcome::Skipped(SkipReason::Ineligible {
                product: info.product,
            });
        }

        info!("{}: provisioning {} ({})", serial, info.product, info.model);

        let apk = &self.settings.apk_path;
        if tokio::fs::try_exists(apk).await.unwrap_or(false) {
            attempt.step = ProvisioningStep::Reinstall;
            if let Err(e) = self.reinstall(&serial).await {
                return AttemptOutcome::Failed(e);
            }

            attempt.step = ProvisioningStep::GrantPermission;
            self.grant_permission(&serial).await;
        } else {
            debug!("{}: no package at {}, skipping reinstall", serial, apk.display());
        }

        attempt.step = ProvisioningStep::Forward;
        if let Err(e) = self.create_forwards(&serial).await {
            return AttemptOutcome::Failed(e);
        }

        attempt.step = ProvisioningStep::Launch;
        if let Err(e) = self.launch(&serial).await {
            return AttemptOutcome::Failed(e);
        }

        AttemptOutcome::Success
    }

    /// Poll the registry until `serial` reports a product or the retry
    /// policy runs out
    ///
    /// Returns the last entry seen for the serial (possibly with an empty
    /// product), or `None` if it was never listed.
    async fn resolve(&self, serial: &DeviceSerial) -> Option<DeviceInfo> {
        let policy = self.settings.metadata_retry;
        let deadline = Instant::now() + policy.timeout;
        let mut backoff = policy.initial_backoff;
        let mut last_seen = None;

        loop {
            match self.bridge.list_devices().await {
                Ok(devices) => {
                    if let Some(info) = devices.into_iter().find(|d| &d.serial == serial) {
                        if !info.product.is_empty() {
                            return Some(info);
                        }
                        debug!("{}: listed as {} without product yet", serial, info.state);
                        last_seen = Some(info);
                    }
                }
                Err(e) => debug!("{}: device registry query failed: {}", serial, e),
            }

            let now = Instant::now();
            if now >= deadline {
                return last_seen;
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(policy.max_backoff);
        }
    }

    async fn reinstall(&self, serial: &DeviceSerial) -> Result<(), ProvisionError> {
        let settings = &self.settings;
        info!("{}: reinstalling {}", serial, settings.package);

        let failed = |stage| {
            move |e: common::Error| ProvisionError::InstallFailed {
                stage,
                message: e.to_string(),
            }
        };

        self.bridge
            .run_shell_command(serial, &settings.force_stop_command())
            .await
            .map_err(failed(InstallStage::Stop))?;
        self.bridge
            .run_shell_command(serial, &settings.clear_data_command())
            .await
            .map_err(failed(InstallStage::Clear))?;
        self.bridge
            .install_package(serial, &settings.apk_path)
            .await
            .map_err(failed(InstallStage::Install))?;

        Ok(())
    }

    /// `pm grant` prints nothing on success
    async fn grant_permission(&self, serial: &DeviceSerial) {
        let permission = &self.settings.permission;
        match self
            .bridge
            .run_shell_command(serial, &self.settings.grant_permission_command())
            .await
        {
            Ok(output) if output.trim().is_empty() => {
                debug!("{}: granted {}", serial, permission);
            }
            Ok(output) => warn!("{}: granting {} failed: {}", serial, permission, output.trim()),
            Err(e) => warn!("{}: granting {} failed: {}", serial, permission, e),
        }
    }

    async fn create_forwards(&self, serial: &DeviceSerial) -> Result<(), ProvisionError> {
        for forward in &self.settings.forwards {
            self.bridge
                .create_forward(serial, forward.local, forward.remote)
                .await
                .map_err(|e| ProvisionError::ForwardFailed {
                    local: forward.local,
                    remote: forward.remote,
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn launch(&self, serial: &DeviceSerial) -> Result<(), ProvisionError> {
        tokio::time::sleep(self.settings.launch_settle).await;

        let output = self
            .bridge
            .run_shell_command(serial, &self.settings.launch_command())
            .await
            .map_err(|e| ProvisionError::LaunchFailed {
                message: e.to_string(),
            })?;

        if output.contains("monkey aborted") {
            return Err(ProvisionError::LaunchFailed {
                message: output.trim().to_string(),
            });
        }

        Ok(())
    }
}

fn log_outcome(attempt: &ProvisioningAttempt) {
    let serial = &attempt.serial;
    match &attempt.outcome {
        AttemptOutcome::Success => info!("{}: provisioned and launched", serial),
        AttemptOutcome::Skipped(SkipReason::Ineligible { product }) if product.is_empty() => {
            warn!("{}: skipped, product not reported", serial)
        }
        AttemptOutcome::Skipped(SkipReason::Ineligible { product }) => {
            warn!("{}: skipped, product {} is not allow-listed", serial, product)
        }
        AttemptOutcome::Skipped(SkipReason::MetadataUnresolved) => {
            debug!("{}: gone before it could be resolved", serial)
        }
        AttemptOutcome::Failed(e) => error!("{}: {} step failed: {}", serial, e.step(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ProvisionSettings {
        ProvisionSettings {
            package: "com.example.app".to_string(),
            apk_path: PathBuf::from("../com.example.app.apk"),
            permission: "android.permission.RECORD_AUDIO".to_string(),
            forwards: vec![PortForward::symmetric(9943), PortForward::symmetric(9944)],
            metadata_retry: RetryPolicy {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                timeout: Duration::from_millis(5),
            },
            launch_settle: Duration::ZERO,
        }
    }

    #[test]
    fn test_shell_commands() {
        let s = settings();
        assert_eq!(s.force_stop_command(), "am force-stop com.example.app");
        assert_eq!(s.clear_data_command(), "pm clear com.example.app");
        assert_eq!(
            s.grant_permission_command(),
            "pm grant com.example.app android.permission.RECORD_AUDIO"
        );
        assert_eq!(s.launch_command(), "monkey -p com.example.app 1");
    }

    #[test]
    fn test_error_step() {
        let e = ProvisionError::ForwardFailed {
            local: 9943,
            remote: 9943,
            message: "cannot bind".to_string(),
        };
        assert_eq!(e.step(), ProvisioningStep::Forward);
        assert!(e.to_string().contains("tcp:9943"));

        let e = ProvisionError::InstallFailed {
            stage: InstallStage::Clear,
            message: "closed".to_string(),
        };
        assert_eq!(e.step(), ProvisioningStep::Reinstall);
        assert!(e.to_string().contains("clear stage"));
    }
}
