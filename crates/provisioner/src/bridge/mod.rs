//! Device bridge
//!
//! The orchestrator only sees the two capabilities defined here: a registry
//! query that resolves serials into device metadata, and a command executor
//! that runs shell commands, creates port forwards and installs packages.
//! [`AdbClient`] implements both against a running ADB server;
//! [`DeviceWatcher`] turns the server's device tracking stream into
//! [`common::DeviceEvent`]s.

pub mod adb;
pub mod watcher;

pub use adb::AdbClient;
pub use watcher::{DeviceSnapshot, DeviceWatcher, diff_device_states};

use common::Result;
use protocol::{DeviceInfo, DeviceSerial};
use std::future::Future;
use std::path::Path;

/// Resolves serials into full device metadata
pub trait DeviceRegistry: Send + Sync + 'static {
    /// Every device the bridge currently knows about
    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceInfo>>> + Send;
}

/// Runs commands against one device
pub trait CommandExecutor: Send + Sync + 'static {
    /// Run `command` in the device shell and return its output
    ///
    /// An error means the command could not be delivered or its output could
    /// not be read, not that the command itself reported failure.
    fn run_shell_command(
        &self,
        serial: &DeviceSerial,
        command: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Forward host `tcp:local_port` to device `tcp:remote_port`
    fn create_forward(
        &self,
        serial: &DeviceSerial,
        local_port: u16,
        remote_port: u16,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Install `apk` on the device, replacing any installed copy
    fn install_package(
        &self,
        serial: &DeviceSerial,
        apk: &Path,
    ) -> impl Future<Output = Result<()>> + Send;
}
