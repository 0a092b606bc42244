//! Bounded channel carrying device presence events
//!
//! The device watcher publishes on one end; the dispatcher consumes on the
//! other. Either side observes closure when its peer is dropped.

use async_channel::{Receiver, Sender, bounded};
use protocol::DeviceSerial;

/// Default number of events buffered before the publisher waits
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Device presence notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Device came online (state `device`)
    Connected {
        serial: DeviceSerial,
    },

    /// Online device went away or changed to a non-online state
    Disconnected {
        serial: DeviceSerial,
    },
}

impl DeviceEvent {
    pub fn serial(&self) -> &DeviceSerial {
        match self {
            Self::Connected { serial } | Self::Disconnected { serial } => serial,
        }
    }
}

/// Sending half, held by the device watcher
#[derive(Clone)]
pub struct EventPublisher {
    event_tx: Sender<DeviceEvent>,
}

impl EventPublisher {
    /// Publish an event, waiting for room if the channel is full
    pub async fn publish(&self, event: DeviceEvent) -> crate::Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// True once every subscriber has been dropped
    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }
}

/// Receiving half, held by the dispatcher
#[derive(Clone)]
pub struct EventSubscriber {
    event_rx: Receiver<DeviceEvent>,
}

impl EventSubscriber {
    /// Receive the next event; errors once every publisher is gone and the
    /// buffer is drained
    pub async fn recv(&self) -> crate::Result<DeviceEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Close the channel from the receiving side
    pub fn close(&self) -> bool {
        self.event_rx.close()
    }
}

/// Create the event channel with the given capacity
///
/// Returns (EventPublisher for the watcher, EventSubscriber for the dispatcher)
pub fn create_event_channel(capacity: usize) -> (EventPublisher, EventSubscriber) {
    let (event_tx, event_rx) = bounded(capacity.max(1));
    (EventPublisher { event_tx }, EventSubscriber { event_rx })
}
