//! Common utilities for adb-provisioner
//!
//! This crate provides shared functionality for the provisioner, including
//! error handling, logging setup, and the bounded channel that carries device
//! presence events from the watcher to the dispatcher.

pub mod channel;
pub mod error;
pub mod logging;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use channel::{
    DeviceEvent, EVENT_CHANNEL_CAPACITY, EventPublisher, EventSubscriber, create_event_channel,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
