use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CastLinkError {
    #[error("adb executable not found at '{}'", .0.display())]
    ToolMissing(PathBuf),

    #[error("'{command}' did not finish within {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("Unexpected adb output: {0}")]
    ParseMismatch(String),

    #[error("adb command failed: {0}")]
    CommandFailed(String),
}
