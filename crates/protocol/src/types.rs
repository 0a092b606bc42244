//! Device types reported by the ADB server

use std::fmt;

/// Serial assigned to a device by the ADB layer
///
/// Stable for the lifetime of one physical connection; meaningless after
/// the device disconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceSerial(pub String);

impl DeviceSerial {
    pub fn new(serial: impl Into<String>) -> Self {
        Self(serial.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for DeviceSerial {
    fn from(serial: &str) -> Self {
        Self(serial.to_string())
    }
}

/// Connection state as reported by `host:devices-l` and `host:track-devices`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// `device`: authorized and ready for commands
    Online,
    Offline,
    Unauthorized,
    Authorizing,
    Connecting,
    /// Host lacks permission to open the USB device (udev rules)
    NoPermissions,
    Bootloader,
    Recovery,
    Sideload,
    Host,
    Unknown(String),
}

impl DeviceState {
    /// Parse the state word(s) the ADB server prints
    pub fn parse(state: &str) -> Self {
        let state = state.trim();
        match state {
            "device" => Self::Online,
            "offline" => Self::Offline,
            "unauthorized" => Self::Unauthorized,
            "authorizing" => Self::Authorizing,
            "connecting" => Self::Connecting,
            "bootloader" => Self::Bootloader,
            "recovery" => Self::Recovery,
            "sideload" => Self::Sideload,
            "host" => Self::Host,
            s if s.starts_with("no permissions") => Self::NoPermissions,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("device"),
            Self::Offline => f.write_str("offline"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::Authorizing => f.write_str("authorizing"),
            Self::Connecting => f.write_str("connecting"),
            Self::NoPermissions => f.write_str("no permissions"),
            Self::Bootloader => f.write_str("bootloader"),
            Self::Recovery => f.write_str("recovery"),
            Self::Sideload => f.write_str("sideload"),
            Self::Host => f.write_str("host"),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

/// One line of a `host:track-devices` snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStateEntry {
    pub serial: DeviceSerial,
    pub state: DeviceState,
}

/// Full device description from `host:devices-l`
///
/// `product` may be empty: the connect notification can arrive before the
/// device has reported its properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: DeviceSerial,
    pub state: DeviceState,
    pub product: String,
    pub model: String,
    pub device: String,
    pub transport_id: Option<u64>,
}

impl DeviceInfo {
    /// Device with only a serial and state known
    pub fn bare(serial: impl Into<String>, state: DeviceState) -> Self {
        Self {
            serial: DeviceSerial::new(serial),
            state,
            product: String::new(),
            model: String::new(),
            device: String::new(),
            transport_id: None,
        }
    }
}

/// Keys `devices -l` prints after the state
const DEVICE_LIST_KEYS: &[&str] = &["usb", "product", "model", "device", "transport_id", "features"];

fn is_property_token(token: &str) -> bool {
    token
        .split_once(':')
        .is_some_and(|(key, _)| DEVICE_LIST_KEYS.contains(&key))
}

/// Parse a `host:track-devices` / `host:devices` payload
///
/// Lines are `serial<TAB>state`. Blank lines are skipped.
pub fn parse_device_states(payload: &str) -> Vec<DeviceStateEntry> {
    payload
        .lines()
        .filter_map(|line| {
            let line = line.trim_end();
            if line.is_empty() {
                return None;
            }
            let (serial, state) = match line.split_once('\t') {
                Some(pair) => pair,
                None => line.split_once(char::is_whitespace)?,
            };
            Some(DeviceStateEntry {
                serial: DeviceSerial::new(serial.trim()),
                state: DeviceState::parse(state),
            })
        })
        .collect()
}

/// Parse a `host:devices-l` payload
///
/// Lines look like
/// `0123456789ABCDEF  device usb:1-1 product:hollywood model:Quest device:hollywood transport_id:3`.
/// The state can span several words (`no permissions (...)`), so every token
/// up to the first known `key:value` pair is taken as the state.
pub fn parse_device_list(payload: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for line in payload.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("List of devices") || line.starts_with('*') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let Some(serial) = tokens.next() else {
            continue;
        };

        let mut state_words = Vec::new();
        let mut in_properties = false;
        let mut info = DeviceInfo::bare(serial, DeviceState::Offline);

        for token in tokens {
            if !is_property_token(token) {
                if !in_properties {
                    state_words.push(token);
                }
                continue;
            }
            in_properties = true;

            if let Some((key, value)) = token.split_once(':') {
                match key {
                    "product" => info.product = value.to_string(),
                    "model" => info.model = value.to_string(),
                    "device" => info.device = value.to_string(),
                    "transport_id" => info.transport_id = value.parse().ok(),
                    _ => {}
                }
            }
        }

        info.state = DeviceState::parse(&state_words.join(" "));
        devices.push(info);
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_states() {
        let entries = parse_device_states("abc123\tdevice\nxyz\tunauthorized\n\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].serial, DeviceSerial::from("abc123"));
        assert_eq!(entries[0].state, DeviceState::Online);
        assert_eq!(entries[1].state, DeviceState::Unauthorized);
    }

    #[test]
    fn test_parse_device_list_full_line() {
        let devices = parse_device_list(
            "1WMHH000000000  device usb:1-1 product:hollywood model:Quest_2 device:hollywood transport_id:7\n",
        );
        assert_eq!(devices.len(), 1);
        let d = &devices[0];
        assert_eq!(d.serial.as_str(), "1WMHH000000000");
        assert_eq!(d.state, DeviceState::Online);
        assert_eq!(d.product, "hollywood");
        assert_eq!(d.model, "Quest_2");
        assert_eq!(d.device, "hollywood");
        assert_eq!(d.transport_id, Some(7));
    }

    #[test]
    fn test_parse_device_list_missing_product() {
        let devices = parse_device_list("abc  offline usb:2-1 transport_id:2\n");
        assert_eq!(devices[0].state, DeviceState::Offline);
        assert!(devices[0].product.is_empty());
    }

    #[test]
    fn test_parse_device_list_multi_word_state() {
        let devices = parse_device_list(
            "abc  no permissions (user in plugdev group; are your udev rules wrong?); see [http://developer.android.com/tools/device.html] usb:1-4 transport_id:1\n",
        );
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].state, DeviceState::NoPermissions);
        assert_eq!(devices[0].transport_id, Some(1));
    }

    #[test]
    fn test_parse_device_list_skips_header() {
        let devices = parse_device_list("List of devices attached\nabc\tdevice product:p\n\n");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].product, "p");
    }

    #[test]
    fn test_state_display_roundtrip() {
        for word in ["device", "offline", "unauthorized", "recovery"] {
            assert_eq!(DeviceState::parse(word).to_string(), word);
        }
        assert_eq!(
            DeviceState::parse("rescue"),
            DeviceState::Unknown("rescue".to_string())
        );
    }
}
