//! Device watcher
//!
//! Holds a `host:track-devices` connection open and converts the stream of
//! device-state snapshots into [`DeviceEvent`]s. If the ADB server goes away
//! the watcher reconnects with exponential backoff; the last known snapshot is
//! kept, so devices that vanished (or appeared) while disconnected are
//! reported once the new connection delivers its first snapshot.

use super::AdbClient;
use common::{DeviceEvent, EventPublisher, Result};
use protocol::{DeviceSerial, DeviceState, parse_device_states};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// First reconnect delay
const INITIAL_RECONNECT_BACKOFF: Duration = Duration::from_millis(250);

/// Device serial -> last reported state
pub type DeviceSnapshot = HashMap<DeviceSerial, DeviceState>;

pub struct DeviceWatcher {
    client: AdbClient,
    publisher: EventPublisher,
    max_backoff: Duration,
}

impl DeviceWatcher {
    pub fn new(client: AdbClient, publisher: EventPublisher, max_backoff: Duration) -> Self {
        Self {
            client,
            publisher,
            max_backoff: max_backoff.max(INITIAL_RECONNECT_BACKOFF),
        }
    }

    /// Watch until the event channel is closed
    pub async fn run(self) -> Result<()> {
        let mut known = DeviceSnapshot::new();
        let mut backoff = INITIAL_RECONNECT_BACKOFF;

        loop {
            if self.publisher.is_closed() {
                break;
            }

            match self.client.track_devices().await {
                Ok(mut stream) => {
                    info!("Tracking devices on ADB server {}", self.client.server_addr());
                    backoff = INITIAL_RECONNECT_BACKOFF;

                    match self.track(&mut stream, &mut known).await {
                        Ok(()) => break,
                        Err(e) => warn!("Device tracking interrupted: {}", e),
                    }
                }
                Err(e) => {
                    warn!("Cannot track devices: {}, retrying in {:?}", e, backoff);
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }

        debug!("Device watcher stopped");
        Ok(())
    }

    /// Consume snapshots from an open tracking stream
    ///
    /// Returns `Ok(())` once nobody listens for events anymore; stream errors
    /// are returned so the caller can reconnect.
    pub async fn track<R>(&self, stream: &mut R, known: &mut DeviceSnapshot) -> Result<()>
    where
        R: AsyncReadExt + Unpin,
    {
        loop {
            let payload = protocol::read_payload_string(stream).await?;
            let current: DeviceSnapshot = parse_device_states(&payload)
                .into_iter()
                .map(|entry| (entry.serial, entry.state))
                .collect();

            for event in diff_device_states(known, &current) {
                if self.publisher.publish(event).await.is_err() {
                    return Ok(());
                }
            }

            *known = current;
        }
    }
}

/// Events implied by moving from `previous` to `current`
///
/// Only transitions into or out of the online state produce events.
/// Disconnects are listed before connects, each group ordered by serial.
pub fn diff_device_states(previous: &DeviceSnapshot, current: &DeviceSnapshot) -> Vec<DeviceEvent> {
    let mut gone: Vec<&DeviceSerial> = previous
        .iter()
        .filter(|(serial, state)| {
            state.is_online() && !current.get(*serial).is_some_and(DeviceState::is_online)
        })
        .map(|(serial, _)| serial)
        .collect();

    let mut arrived: Vec<&DeviceSerial> = current
        .iter()
        .filter(|(serial, state)| {
            state.is_online() && !previous.get(*serial).is_some_and(DeviceState::is_online)
        })
        .map(|(serial, _)| serial)
        .collect();

    for (serial, state) in current {
        match previous.get(serial) {
            Some(old) if old != state && !old.is_online() && !state.is_online() => {
                debug!("{}: {} -> {}", serial, old, state);
            }
            None if !state.is_online() => debug!("{}: appeared as {}", serial, state),
            _ => {}
        }
    }

    gone.sort();
    arrived.sort();

    gone.into_iter()
        .map(|serial| DeviceEvent::Disconnected {
            serial: serial.clone(),
        })
        .chain(arrived.into_iter().map(|serial| DeviceEvent::Connected {
            serial: serial.clone(),
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, DeviceState)]) -> DeviceSnapshot {
        entries
            .iter()
            .map(|(s, state)| (DeviceSerial::from(*s), state.clone()))
            .collect()
    }

    #[test]
    fn test_new_online_device_connects() {
        let events = diff_device_states(
            &DeviceSnapshot::new(),
            &snapshot(&[("a", DeviceState::Online)]),
        );
        assert_eq!(
            events,
            vec![DeviceEvent::Connected {
                serial: DeviceSerial::from("a")
            }]
        );
    }

    #[test]
    fn test_authorization_completes_connects() {
        let events = diff_device_states(
            &snapshot(&[("a", DeviceState::Unauthorized)]),
            &snapshot(&[("a", DeviceState::Online)]),
        );
        assert!(matches!(events.as_slice(), [DeviceEvent::Connected { .. }]));
    }

    #[test]
    fn test_removed_or_offline_disconnects() {
        let previous = snapshot(&[("a", DeviceState::Online), ("b", DeviceState::Online)]);
        let current = snapshot(&[("b", DeviceState::Offline)]);

        let events = diff_device_states(&previous, &current);
        assert_eq!(
            events,
            vec![
                DeviceEvent::Disconnected {
                    serial: DeviceSerial::from("a")
                },
                DeviceEvent::Disconnected {
                    serial: DeviceSerial::from("b")
                },
            ]
        );
    }

    #[test]
    fn test_non_online_transitions_are_silent() {
        let events = diff_device_states(
            &snapshot(&[("a", DeviceState::Connecting)]),
            &snapshot(&[("a", DeviceState::Unauthorized), ("b", DeviceState::Offline)]),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_unchanged_online_is_silent() {
        let both = snapshot(&[("a", DeviceState::Online)]);
        assert!(diff_device_states(&both, &both).is_empty());
    }
}
