//! ADB server client
//!
//! Speaks the host smart-socket protocol to a running ADB server. The server
//! serves exactly one request per connection (or one transport switch plus one
//! device service), so every operation opens a fresh TCP connection. The
//! client itself holds no connection state and is cheap to clone and share
//! between concurrent attempts.

use super::{CommandExecutor, DeviceRegistry};
use common::{Error, Result};
use protocol::sync::{self, DEFAULT_FILE_MODE};
use protocol::{DeviceInfo, DeviceSerial, parse_device_list};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Staging directory for pushed packages
const REMOTE_TMP_DIR: &str = "/data/local/tmp";

#[derive(Debug, Clone)]
pub struct AdbClient {
    server_addr: String,
}

impl AdbClient {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
        }
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    async fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect(&self.server_addr).await.map_err(|e| {
            Error::Bridge(format!(
                "Failed to connect to ADB server at {}: {}",
                self.server_addr, e
            ))
        })
    }

    /// Open a connection and have `service` accepted on it
    async fn request(&self, service: &str) -> Result<TcpStream> {
        let mut stream = self.connect().await?;
        protocol::write_request(&mut stream, service).await?;
        protocol::expect_okay(&mut stream).await?;
        Ok(stream)
    }

    /// Open a connection switched to the transport of `serial`
    async fn open_transport(&self, serial: &DeviceSerial) -> Result<TcpStream> {
        let stream = self.request(&format!("host:transport:{}", serial)).await?;
        debug!("Transport open for {}", serial);
        Ok(stream)
    }

    /// Internal version of the ADB server, used as a reachability check
    pub async fn server_version(&self) -> Result<u32> {
        let mut stream = self.request("host:version").await?;
        let payload = protocol::read_payload_string(&mut stream).await?;
        u32::from_str_radix(payload.trim(), 16)
            .map_err(|_| Error::Bridge(format!("Invalid server version {:?}", payload)))
    }

    /// Query `host:devices-l`
    pub async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut stream = self.request("host:devices-l").await?;
        let payload = protocol::read_payload_string(&mut stream).await?;
        Ok(parse_device_list(&payload))
    }

    /// Start `host:track-devices`; the returned stream yields one
    /// length-prefixed snapshot per change, starting with the current state
    pub async fn track_devices(&self) -> Result<TcpStream> {
        self.request("host:track-devices").await
    }

    /// Run a shell command (shell protocol v1) and collect its output
    pub async fn shell(&self, serial: &DeviceSerial, command: &str) -> Result<String> {
        let mut stream = self.open_transport(serial).await?;
        protocol::write_request(&mut stream, &format!("shell:{}", command)).await?;
        protocol::expect_okay(&mut stream).await?;

        let mut output = Vec::new();
        stream.read_to_end(&mut output).await?;
        debug!("{}: `{}` -> {} byte(s)", serial, command, output.len());
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Create a `tcp:local -> tcp:remote` forward
    ///
    /// The server replies twice: once when the target device is found, and
    /// once with the result of binding the forward.
    pub async fn forward(&self, serial: &DeviceSerial, local: u16, remote: u16) -> Result<()> {
        let mut stream = self.connect().await?;
        protocol::write_request(
            &mut stream,
            &format!("host-serial:{}:forward:tcp:{};tcp:{}", serial, local, remote),
        )
        .await?;
        protocol::expect_okay(&mut stream).await?;
        protocol::expect_okay(&mut stream).await?;
        debug!("{}: forwarded tcp:{} -> tcp:{}", serial, local, remote);
        Ok(())
    }

    /// Push a local file to `remote_path` over the sync service
    pub async fn push(&self, serial: &DeviceSerial, local: &Path, remote_path: &str) -> Result<u64> {
        let mut file = tokio::fs::File::open(local).await?;
        let mtime = file
            .metadata()
            .await?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let mut stream = self.open_transport(serial).await?;
        protocol::write_request(&mut stream, "sync:").await?;
        protocol::expect_okay(&mut stream).await?;

        let sent = sync::push(&mut stream, &mut file, remote_path, DEFAULT_FILE_MODE, mtime).await?;
        if let Err(e) = sync::quit(&mut stream).await {
            debug!("{}: sync quit failed: {}", serial, e);
        }

        debug!("{}: pushed {} byte(s) to {}", serial, sent, remote_path);
        Ok(sent)
    }

    /// Install an APK with reinstall semantics (`pm install -r`)
    pub async fn install(&self, serial: &DeviceSerial, apk: &Path) -> Result<()> {
        let remote_path = format!("{}/{}", REMOTE_TMP_DIR, staged_file_name(apk));
        self.push(serial, apk, &remote_path).await?;

        let result = self
            .shell(serial, &format!("pm install -r \"{}\"", remote_path))
            .await;

        if let Err(e) = self.shell(serial, &format!("rm -f \"{}\"", remote_path)).await {
            warn!("{}: failed to remove {}: {}", serial, remote_path, e);
        }

        let output = result?;
        if output.contains("Success") {
            Ok(())
        } else {
            Err(Error::Bridge(format!("pm install failed: {}", output.trim())))
        }
    }
}

/// Name the package is staged under on the device
///
/// Only characters safe inside a quoted shell argument are kept.
fn staged_file_name(apk: &Path) -> String {
    let name = apk
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| {
            !n.is_empty()
                && n
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        })
        .unwrap_or("package.apk");
    name.to_string()
}

impl DeviceRegistry for AdbClient {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.devices().await
    }
}

impl CommandExecutor for AdbClient {
    async fn run_shell_command(&self, serial: &DeviceSerial, command: &str) -> Result<String> {
        self.shell(serial, command).await
    }

    async fn create_forward(
        &self,
        serial: &DeviceSerial,
        local_port: u16,
        remote_port: u16,
    ) -> Result<()> {
        self.forward(serial, local_port, remote_port).await
    }

    async fn install_package(&self, serial: &DeviceSerial, apk: &Path) -> Result<()> {
        self.install(serial, apk).await
    }
}
