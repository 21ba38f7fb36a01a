//! Device discovery and wireless bridging for adb-attached displays
//!
//! This library finds Android/Quest devices through `adb`, classifies their
//! connection state for a UI, and moves a USB-attached device onto a wireless
//! adb link so a screen-mirroring tool can reach it without a cable.
//!
//! # Modules
//!
//! - [`adb`] - Typed adb invocations on top of a command runner
//! - [`bridge`] - USB to wireless migration and teardown
//! - [`config`] - TOML configuration and per-invocation bridge options
//! - [`connection`] - Connection state classification
//! - [`device`] - Parsing `adb devices -l` and picking the primary device
//! - [`error`] - Error taxonomy for adb interaction
//! - [`interface`] - Wireless interface discovery on the device
//! - [`resolve`] - Ordered strategies for finding the device's wireless IP
//! - [`runner`] - Bounded command execution
//! - [`server`] - Local HTTP/JSON surface for UIs
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use castlink::{BridgeOptions, DeviceControl, ProcessRunner, WirelessBridge, classify, list_devices};
//!
//! let adb = DeviceControl::new("/usr/bin/adb", Arc::new(ProcessRunner::default()));
//!
//! // What is attached right now?
//! let devices = list_devices(&adb);
//! println!("{}", classify(devices.primary()).text);
//!
//! // Move the USB device to Wi-Fi
//! let result = WirelessBridge::new(adb).bridge(&BridgeOptions::default());
//! println!("{}", result.message);
//! ```

pub mod adb;

pub mod bridge;

/// Configuration module for the adb location, timeouts and bridge settings.
/// Reads and writes a TOML file in the user's config directory.
pub mod config;

pub mod connection;

pub mod device;

/// Error module defining the adb error taxonomy.
/// Uses `thiserror` for ergonomic error handling.
pub mod error;

/// Interface module for discovering wireless links on the device.
pub mod interface;

pub mod resolve;

pub mod runner;

/// Server module exposing status, device and bridge endpoints over HTTP.
/// Uses Axum; engine calls run on the blocking thread pool.
pub mod server;

pub use adb::DeviceControl;

pub use bridge::{BridgeError, BridgeOptions, BridgeResult, WirelessBridge};

pub use connection::{ConnectionState, ConnectionStatus, classify, current_status};

pub use device::{DeviceEntry, DeviceList, RawState, TransportKind, list_devices};

pub use error::CastLinkError;

pub use resolve::{AddressResolver, AddressStrategy, ResolverMode};

pub use runner::{CommandOutput, CommandRunner, ProcessRunner, ScriptedRunner};
