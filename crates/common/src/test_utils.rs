//! Test utilities for adb-provisioner
//!
//! Provides mock device descriptions, ADB payload builders and async timeout
//! helpers shared by the crates' tests.
//!
//! # Example
//!
//! ```ignore
//! use common::test_utils::create_mock_device_info;
//!
//! let device = create_mock_device_info("SERIAL1", "hollywood");
//! assert_eq!(device.serial.as_str(), "SERIAL1");
//! assert_eq!(device.product, "hollywood");
//! ```

use protocol::{DeviceInfo, DeviceSerial, DeviceState};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create an online DeviceInfo with the given serial and product
pub fn create_mock_device_info(serial: &str, product: &str) -> DeviceInfo {
    DeviceInfo {
        serial: DeviceSerial::from(serial),
        state: DeviceState::Online,
        product: product.to_string(),
        model: format!("Model_{}", product),
        device: product.to_string(),
        transport_id: Some(1),
    }
}

/// Create an online DeviceInfo whose product has not been reported yet
pub fn create_mock_unresolved_device(serial: &str) -> DeviceInfo {
    DeviceInfo::bare(serial, DeviceState::Online)
}

/// Create `count` online devices named `SERIAL<n>` with product `product<n>`
///
/// # Example
/// ```ignore
/// use common::test_utils::create_mock_device_list;
///
/// let devices = create_mock_device_list(3);
/// assert_eq!(devices.len(), 3);
/// assert_eq!(devices[2].product, "product3");
/// ```
pub fn create_mock_device_list(count: u32) -> Vec<DeviceInfo> {
    (1..=count)
        .map(|i| create_mock_device_info(&format!("SERIAL{}", i), &format!("product{}", i)))
        .collect()
}

/// Render devices the way `host:devices-l` does
pub fn format_device_list(devices: &[DeviceInfo]) -> String {
    let mut out = String::new();
    for device in devices {
        out.push_str(&format!("{:<22} {}", device.serial, device.state));
        if !device.product.is_empty() {
            out.push_str(&format!(" product:{}", device.product));
        }
        if !device.model.is_empty() {
            out.push_str(&format!(" model:{}", device.model));
        }
        if !device.device.is_empty() {
            out.push_str(&format!(" device:{}", device.device));
        }
        if let Some(id) = device.transport_id {
            out.push_str(&format!(" transport_id:{}", id));
        }
        out.push('\n');
    }
    out
}

/// Render `(serial, state)` pairs the way `host:track-devices` does
pub fn format_device_states(entries: &[(&str, DeviceState)]) -> String {
    entries
        .iter()
        .map(|(serial, state)| format!("{}\t{}\n", serial, state))
        .collect()
}

/// Run `future`, giving up after `duration`
///
/// Keeps a stuck watcher or dispatcher from hanging the whole test run.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// The wrapped future did not finish in time
#[derive(Debug, thiserror::Error)]
#[error("Did not complete within {duration:?}")]
pub struct TimeoutError {
    pub duration: Duration,
}
