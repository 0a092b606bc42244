//! ADB host protocol library
//!
//! This crate implements the wire format spoken between a host-side client and
//! the ADB server: hex length-prefixed service requests, `OKAY`/`FAIL` status
//! replies, device list payloads and the binary `sync:` file transfer framing.
//!
//! # Example
//!
//! ```
//! use protocol::{encode_request, decode_payload};
//!
//! let frame = encode_request("host:devices-l").unwrap();
//! assert_eq!(decode_payload(&frame).unwrap(), b"host:devices-l");
//! ```
//!
//! # Device lists
//!
//! ```
//! use protocol::{DeviceState, parse_device_list};
//!
//! let devices = parse_device_list("abc123  device product:hollywood model:Quest_2\n");
//! assert_eq!(devices[0].state, DeviceState::Online);
//! assert_eq!(devices[0].product, "hollywood");
//! ```

pub mod codec;
pub mod error;
pub mod sync;
pub mod types;

pub use codec::{
    LENGTH_PREFIX_SIZE, MAX_PAYLOAD_SIZE, Status, decode_length, decode_payload, encode_payload,
    encode_request,
};

#[cfg(feature = "async")]
pub use codec::{expect_okay, read_payload, read_payload_string, read_status, write_request};
pub use error::{ProtocolError, Result};
pub use types::{
    DeviceInfo, DeviceSerial, DeviceState, DeviceStateEntry, parse_device_list,
    parse_device_states,
};
