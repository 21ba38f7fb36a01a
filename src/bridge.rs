//! Moving a USB-attached device onto a wireless adb link, and back.
//!
//! A bridge attempt walks a fixed sequence of steps and stops at the first
//! failure:
//!
//! 1. If the primary device is already a ready network device, succeed
//!    without touching anything.
//! 2. Poll the listing for a USB device in `device` state.
//! 3. `adb -s <serial> tcpip <port>`.
//! 4. Wait for the device network stack to settle.
//! 5. Resolve the wireless address (see [`crate::resolve`]).
//! 6. `adb connect <ip>:<port>` and check the reply.
//!
//! Every step is a blocking adb call with its own timeout, so a full attempt
//! can take several seconds. Callers that must stay responsive should run it
//! on a worker thread. Attempts against the same physical device must not
//! overlap; serializing them is the caller's job.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use castlink::{BridgeOptions, DeviceControl, ProcessRunner, WirelessBridge};
//!
//! let adb = DeviceControl::new("/usr/bin/adb", Arc::new(ProcessRunner::default()));
//! let result = WirelessBridge::new(adb).bridge(&BridgeOptions::default());
//! println!("{}", result.message);
//! ```

use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::adb::DeviceControl;
use crate::device::list_devices;
use crate::resolve::{AddressResolver, DEFAULT_ROUTE_ANCHOR, ResolverMode};
use crate::runner::CommandOutput;

/// Port adb listens on after `adb tcpip`.
pub const DEFAULT_WIRELESS_PORT: u16 = 5555;

/// Settings for one bridge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    pub port: u16,
    /// How many times to look for a ready USB device.
    pub ready_attempts: u32,
    /// Pause between those looks.
    pub ready_delay: Duration,
    /// Pause after switching to TCP mode, before resolving the address.
    pub settle_delay: Duration,
    /// Pause before the resolver's second pass.
    pub resolve_retry_delay: Duration,
    pub route_anchor: String,
    pub resolver: ResolverMode,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_WIRELESS_PORT,
            ready_attempts: 3,
            ready_delay: Duration::from_secs(2),
            settle_delay: Duration::from_secs(1),
            resolve_retry_delay: Duration::from_secs(1),
            route_anchor: DEFAULT_ROUTE_ANCHOR.to_string(),
            resolver: ResolverMode::Full,
        }
    }
}

/// Outcome of a bridge or teardown, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeResult {
    pub success: bool,
    pub message: String,
}

impl From<Result<String, BridgeError>> for BridgeResult {
    fn from(result: Result<String, BridgeError>) -> Self {
        match result {
            Ok(message) => Self {
                success: true,
                message,
            },
            Err(err) => Self {
                success: false,
                message: err.to_string(),
            },
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error(
        "no authorized wired device found; connect the cable and allow USB debugging on the device"
    )]
    NoWiredDevice,

    #[error("switching {serial} to tcpip {port} failed:\n{output}")]
    TransportSwitch {
        serial: String,
        port: u16,
        output: String,
    },

    #[error(
        "no wireless address found for {serial}; make sure Wi-Fi is on and this computer is on the same network\n\nip route:\n{routes}\n\nip -o -4 addr:\n{addresses}"
    )]
    AddressNotFound {
        serial: String,
        routes: String,
        addresses: String,
    },

    #[error("connecting to {target} failed:\n{output}")]
    ConnectFailed { target: String, output: String },

    #[error("no active wireless connection to disconnect")]
    NoWirelessConnection,
}

/// Drives bridge and teardown against one adb installation.
#[derive(Debug, Clone)]
pub struct WirelessBridge {
    adb: DeviceControl,
}

impl WirelessBridge {
    pub fn new(adb: DeviceControl) -> Self {
        Self { adb }
    }

    /// Moves the device to a wireless link using the resolver chain named in
    /// `options`.
    pub fn bridge(&self, options: &BridgeOptions) -> BridgeResult {
        let resolver = AddressResolver::for_mode(
            options.resolver,
            &options.route_anchor,
            options.resolve_retry_delay,
        );
        self.bridge_with(options, &resolver).into()
    }

    /// Same as [`WirelessBridge::bridge`] with a caller-supplied resolver.
    pub fn bridge_with(
        &self,
        options: &BridgeOptions,
        resolver: &AddressResolver,
    ) -> Result<String, BridgeError> {
        let devices = list_devices(&self.adb);
        if let Some(primary) = devices.primary().filter(|d| d.is_network() && d.is_ready()) {
            info!(serial = %primary.serial, "already on a wireless link");
            return Ok(format!(
                "device already connected wirelessly ({}); the cable can be unplugged",
                primary.serial
            ));
        }

        let serial = self.await_wired_ready(options).ok_or_else(|| {
            warn!(attempts = options.ready_attempts, "no ready USB device");
            BridgeError::NoWiredDevice
        })?;

        info!(%serial, port = options.port, "switching to tcpip");
        let switch = self.adb.tcpip(&serial, options.port);
        if !switch.success() {
            warn!(%serial, exit_code = ?switch.exit_code, "tcpip switch failed");
            return Err(BridgeError::TransportSwitch {
                serial,
                port: options.port,
                output: transcript(&switch),
            });
        }

        thread::sleep(options.settle_delay);

        let Some(ip) = resolver.resolve(&self.adb, &serial) else {
            warn!(%serial, "wireless address not found");
            return Err(self.address_not_found(serial));
        };

        let target = format!("{}:{}", ip, options.port);
        info!(%target, "connecting");
        let connect = self.adb.connect(&target);
        if !connect_succeeded(&connect) {
            warn!(%target, exit_code = ?connect.exit_code, "connect failed");
            return Err(BridgeError::ConnectFailed {
                target,
                output: transcript(&connect),
            });
        }

        info!(%target, "wireless link established");
        Ok(format!(
            "wireless connection established to {target}; the cable can be unplugged"
        ))
    }

    /// Drops the wireless link of the primary device and puts adb back into
    /// USB mode.
    pub fn disconnect(&self) -> BridgeResult {
        self.try_disconnect().into()
    }

    fn try_disconnect(&self) -> Result<String, BridgeError> {
        let devices = list_devices(&self.adb);
        let serial = devices
            .primary()
            .filter(|d| d.is_network())
            .map(|d| d.serial.clone())
            .ok_or(BridgeError::NoWirelessConnection)?;

        let out = self.adb.disconnect(&serial);
        if !out.success() {
            warn!(%serial, output = %transcript(&out), "disconnect reported an error");
        }
        // Best effort: the USB link may already be gone.
        let _ = self.adb.usb();

        info!(%serial, "wireless link closed");
        Ok(format!("wireless connection closed ({serial})"))
    }

    fn await_wired_ready(&self, options: &BridgeOptions) -> Option<String> {
        let attempts = options.ready_attempts.max(1);
        for attempt in 1..=attempts {
            let devices = list_devices(&self.adb);
            if let Some(device) = devices.ready_local() {
                return Some(device.serial.clone());
            }
            info!(attempt, attempts, "waiting for an authorized USB device");
            if attempt < attempts {
                thread::sleep(options.ready_delay);
            }
        }
        None
    }

    fn address_not_found(&self, serial: String) -> BridgeError {
        let routes = self.adb.shell(&serial, &["ip", "route"]);
        let addresses = self.adb.shell(&serial, &["ip", "-o", "-4", "addr"]);
        BridgeError::AddressNotFound {
            serial,
            routes: routes.stdout.trim_end().to_string(),
            addresses: addresses.stdout.trim_end().to_string(),
        }
    }
}

/// Whether `adb connect` reported a live connection.
///
/// adb exits with 0 for some failures ("failed to connect to ..."), so the
/// reply text must also confirm the connection.
pub fn connect_succeeded(output: &CommandOutput) -> bool {
    if !output.success() {
        return false;
    }
    let text = output.combined().to_lowercase();
    text.contains("connected to") || text.contains("already connected")
}

fn transcript(output: &CommandOutput) -> String {
    format!("{}\n{}", output.stdout.trim_end(), output.stderr.trim_end())
        .trim()
        .to_string()
}
