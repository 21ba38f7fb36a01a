//! Connection state classification.
//!
//! This module turns the primary device of a listing into a small, stable
//! status that a UI can render without knowing anything about adb. The
//! mapping is a pure function of the latest listing: no transition memory is
//! kept, so flapping hardware is reflected on the very next query.
//!
//! # States
//!
//! | Primary device | adb state      | Result    |
//! |----------------|----------------|-----------|
//! | none           | -              | `None`    |
//! | present        | `unauthorized` | `Pairing` |
//! | present        | `offline`      | `None`    |
//! | present        | `device`       | `Ready`   |
//! | present        | anything else  | `None`    |
//!
//! `Casting` is never produced here. It is layered on by whoever tracks the
//! running mirroring process.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use castlink::{DeviceControl, ProcessRunner, connection::current_status};
//!
//! let adb = DeviceControl::new("/usr/bin/adb", Arc::new(ProcessRunner::default()));
//! let status = current_status(&adb);
//! println!("{:?}: {}", status.state, status.text);
//! ```

use serde::Serialize;

use crate::adb::DeviceControl;
use crate::device::{DeviceEntry, RawState, list_devices};

/// Coarse connection state consumed by UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No usable device.
    None,
    /// A device is attached but has not authorized this host yet.
    Pairing,
    /// A device is attached and accepts commands.
    Ready,
    /// A mirroring session is running. Set by the session owner, never by
    /// [`classify`].
    Casting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::None => "none",
            ConnectionState::Pairing => "pairing",
            ConnectionState::Ready => "ready",
            ConnectionState::Casting => "casting",
        }
    }
}

/// Classifier output: a state plus a message for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub text: String,
}

impl ConnectionStatus {
    fn new(state: ConnectionState, text: impl Into<String>) -> Self {
        Self {
            state,
            text: text.into(),
        }
    }

    /// Overlays the `Casting` state for a live mirroring session.
    pub fn casting(self) -> Self {
        Self::new(ConnectionState::Casting, format!("casting ({})", self.text))
    }
}

/// Maps the primary device (if any) to a [`ConnectionStatus`].
///
/// # Arguments
/// * `primary` - The device returned by [`crate::DeviceList::primary`]
///
/// # Returns
/// The status for the table in the module documentation. The text names the
/// transport side (`wireless` or `wired`), and the serial once the device is
/// ready.
pub fn classify(primary: Option<&DeviceEntry>) -> ConnectionStatus {
    let Some(device) = primary else {
        return ConnectionStatus::new(ConnectionState::None, "no device attached");
    };
    let side = device.transport.side();

    match device.state {
        RawState::Unauthorized => ConnectionStatus::new(
            ConnectionState::Pairing,
            format!("{side} device detected but not authorized; approve on device"),
        ),
        RawState::Offline => ConnectionStatus::new(
            ConnectionState::None,
            format!("{side} device offline; reconnect"),
        ),
        RawState::Device => ConnectionStatus::new(
            ConnectionState::Ready,
            format!("{side} device connected: {}", device.serial),
        ),
        RawState::Other => ConnectionStatus::new(
            ConnectionState::None,
            "connection state indeterminate; reconnect",
        ),
    }
}

/// Lists devices and classifies the primary one.
pub fn current_status(adb: &DeviceControl) -> ConnectionStatus {
    let devices = list_devices(adb);
    classify(devices.primary())
}

/// Displays connection status information in a human-readable format.
///
/// # Output Format
/// ```text
/// State:  ready
/// Detail: wireless device connected: 192.168.1.50:5555
/// ```
pub fn display_status(status: &ConnectionStatus) {
    println!("State:  {}", status.state.as_str());
    println!("Detail: {}", status.text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::parse_listing;
    use crate::runner::{CommandOutput, ScriptedRunner};
    use std::sync::Arc;

    fn status_of(listing: &str) -> ConnectionStatus {
        let list = parse_listing(&format!("List of devices attached\n{listing}"));
        classify(list.primary())
    }

    #[test]
    fn test_wireless_ready() {
        let status = status_of("192.168.1.50:5555  device\n");
        assert_eq!(status.state, ConnectionState::Ready);
        assert_eq!(status.text, "wireless device connected: 192.168.1.50:5555");
    }

    #[test]
    fn test_wired_unauthorized_is_pairing() {
        let status = status_of("ABCD1234  unauthorized\n");
        assert_eq!(status.state, ConnectionState::Pairing);
        assert!(status.text.starts_with("wired device detected but not authorized"));
    }

    #[test]
    fn test_offline_and_unknown_are_none() {
        let offline = status_of("10.1.1.1:5555 offline\n");
        assert_eq!(offline.state, ConnectionState::None);
        assert_eq!(offline.text, "wireless device offline; reconnect");

        let odd = status_of("ABCD1234 sideload\n");
        assert_eq!(odd.state, ConnectionState::None);
        assert_eq!(odd.text, "connection state indeterminate; reconnect");
    }

    #[test]
    fn test_no_entries_is_none() {
        for listing in ["", "\n", "garbage\n", "   \n"] {
            assert_eq!(status_of(listing).state, ConnectionState::None);
        }
        assert_eq!(classify(None).text, "no device attached");
    }

    #[test]
    fn test_wired_ready_names_serial() {
        let status = status_of("ABCD1234 device usb:1-1\n");
        assert_eq!(status.state, ConnectionState::Ready);
        assert_eq!(status.text, "wired device connected: ABCD1234");
    }

    #[test]
    fn test_casting_overlay() {
        let status = status_of("ABCD1234 device\n").casting();
        assert_eq!(status.state, ConnectionState::Casting);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "casting");
    }

    #[test]
    fn test_current_status_reflects_each_query() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .respond("devices -l", CommandOutput::ok("List of devices attached\nABC device\n"))
            .respond("devices -l", CommandOutput::ok("List of devices attached\nABC offline\n"));
        let adb = DeviceControl::new("adb", runner);

        assert_eq!(current_status(&adb).state, ConnectionState::Ready);
        assert_eq!(current_status(&adb).state, ConnectionState::None);
    }
}
