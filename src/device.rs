//! Device registry built from `adb devices -l`.
//!
//! Each query produces a fresh [`DeviceList`]; nothing is cached between
//! calls. Entries are classified as network or local transport by the shape
//! of their serial (`a.b.c.d:port` means the device is reached over TCP).

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::adb::DeviceControl;
use crate::error::CastLinkError;

lazy_static! {
    static ref IP_SERIAL: Regex =
        Regex::new(r"^\d{1,3}(?:\.\d{1,3}){3}:\d{2,5}$").expect("valid serial pattern");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Reached over TCP (`adb connect`).
    Network,
    /// Reached over USB.
    Local,
}

impl TransportKind {
    pub fn from_serial(serial: &str) -> Self {
        if IP_SERIAL.is_match(serial) {
            TransportKind::Network
        } else {
            TransportKind::Local
        }
    }

    /// "wireless" or "wired", as shown to users.
    pub fn side(&self) -> &'static str {
        match self {
            TransportKind::Network => "wireless",
            TransportKind::Local => "wired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RawState {
    Device,
    Unauthorized,
    Offline,
    Other,
}

impl RawState {
    pub fn parse(field: &str) -> Self {
        match field {
            "device" => RawState::Device,
            "unauthorized" => RawState::Unauthorized,
            "offline" => RawState::Offline,
            _ => RawState::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RawState::Device => "device",
            RawState::Unauthorized => "unauthorized",
            RawState::Offline => "offline",
            RawState::Other => "unknown",
        }
    }
}

/// One line of a device listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEntry {
    pub serial: String,
    pub transport: TransportKind,
    pub state: RawState,
}

impl DeviceEntry {
    pub fn new(serial: impl Into<String>, state: RawState) -> Self {
        let serial = serial.into();
        Self {
            transport: TransportKind::from_serial(&serial),
            serial,
            state,
        }
    }

    pub fn is_network(&self) -> bool {
        self.transport == TransportKind::Network
    }

    pub fn is_ready(&self) -> bool {
        self.state == RawState::Device
    }
}

/// Devices in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeviceList {
    entries: Vec<DeviceEntry>,
}

impl DeviceList {
    pub fn new(entries: Vec<DeviceEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First network entry, else first local entry.
    pub fn primary(&self) -> Option<&DeviceEntry> {
        self.entries
            .iter()
            .find(|e| e.is_network())
            .or_else(|| self.first_local())
    }

    /// First local entry, whatever its state.
    pub fn first_local(&self) -> Option<&DeviceEntry> {
        self.entries.iter().find(|e| !e.is_network())
    }

    /// First local entry that adb reports as `device`.
    pub fn ready_local(&self) -> Option<&DeviceEntry> {
        self.entries.iter().find(|e| !e.is_network() && e.is_ready())
    }
}

/// Parses the text printed by `adb devices -l`.
///
/// The header line is dropped, as are adb's own `* daemon ...` notices that
/// may precede it. Lines with fewer than two fields are skipped.
pub fn parse_listing(text: &str) -> DeviceList {
    let lines: Vec<&str> = text.lines().collect();
    let body = match lines
        .iter()
        .position(|l| l.trim_start().starts_with("List of devices"))
    {
        Some(header) => &lines[header + 1..],
        None => lines.get(1..).unwrap_or_default(),
    };

    let entries = body
        .iter()
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            Some(DeviceEntry::new(serial, RawState::parse(state)))
        })
        .collect();

    DeviceList::new(entries)
}

/// Queries adb for attached devices.
///
/// A missing adb executable yields an empty list, indistinguishable from no
/// devices being attached.
pub fn list_devices(adb: &DeviceControl) -> DeviceList {
    if !adb.is_available() {
        debug!("{}", CastLinkError::ToolMissing(adb.tool().to_path_buf()));
        return DeviceList::default();
    }

    let output = adb.devices();
    if let Some(err) = output.failure_kind("adb devices -l") {
        warn!(error = %err, "device listing failed");
    }
    let devices = parse_listing(&output.stdout);
    debug!(count = devices.entries().len(), "listed devices");
    devices
}
