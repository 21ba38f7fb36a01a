//! Typed front for the adb command line.
//!
//! [`DeviceControl`] owns the path of the adb executable and a
//! [`CommandRunner`], and builds each argument vector the engine needs.
//! Nothing here interprets the output; parsing lives with the callers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::runner::{CommandOutput, CommandRunner};

#[derive(Clone)]
pub struct DeviceControl {
    tool: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for DeviceControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceControl")
            .field("tool", &self.tool)
            .finish_non_exhaustive()
    }
}

impl DeviceControl {
    pub fn new(tool: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            tool: tool.into(),
            runner,
        }
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// Whether the adb executable is present at its configured location.
    pub fn is_available(&self) -> bool {
        self.runner.program_exists(&self.tool)
    }

    /// Runs `adb <args...>`.
    pub fn run<S: AsRef<str>>(&self, args: &[S]) -> CommandOutput {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.tool.to_string_lossy().into_owned());
        argv.extend(args.iter().map(|a| a.as_ref().to_string()));
        self.runner.run(&argv)
    }

    /// Runs `adb -s <serial> shell <args...>`.
    pub fn shell<S: AsRef<str>>(&self, serial: &str, args: &[S]) -> CommandOutput {
        let mut full = vec!["-s".to_string(), serial.to_string(), "shell".to_string()];
        full.extend(args.iter().map(|a| a.as_ref().to_string()));
        self.run(full.as_slice())
    }

    /// `adb devices -l`
    pub fn devices(&self) -> CommandOutput {
        self.run(&["devices", "-l"])
    }

    /// `adb -s <serial> tcpip <port>`
    pub fn tcpip(&self, serial: &str, port: u16) -> CommandOutput {
        self.run(&["-s", serial, "tcpip", port.to_string().as_str()])
    }

    /// `adb connect <target>`
    pub fn connect(&self, target: &str) -> CommandOutput {
        self.run(&["connect", target])
    }

    /// `adb disconnect <serial>`
    pub fn disconnect(&self, serial: &str) -> CommandOutput {
        self.run(&["disconnect", serial])
    }

    /// `adb usb`
    pub fn usb(&self) -> CommandOutput {
        self.run(&["usb"])
    }
}

/// Finds `adb` on `PATH`. Falls back to the bare name, which is then
/// reported as missing by [`DeviceControl::is_available`].
pub fn locate_adb() -> PathBuf {
    let name = if cfg!(windows) { "adb.exe" } else { "adb" };
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .find(|candidate| candidate.is_file())
        })
        .unwrap_or_else(|| PathBuf::from(name))
}
