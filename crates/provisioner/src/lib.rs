//! ADB device provisioner
//!
//! Watches the ADB server for devices coming online and, for every device
//! whose product is allow-listed, reinstalls the companion app, forwards the
//! streaming ports and launches the app.

pub mod allow_list;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod orchestrator;

pub use allow_list::AllowList;
pub use bridge::{AdbClient, CommandExecutor, DeviceRegistry, DeviceWatcher};
pub use config::ProvisionerConfig;
pub use dispatch::{DispatchSummary, Dispatcher};
pub use orchestrator::{
    AttemptOutcome, InstallStage, Orchestrator, PortForward, ProvisionError, ProvisionSettings,
    ProvisioningAttempt, ProvisioningStep, RetryPolicy, SkipReason,
};
