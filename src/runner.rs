//! Bounded execution of external commands.
//!
//! Every adb invocation in the crate goes through a [`CommandRunner`]. The
//! runner never fails: spawn errors, timeouts and non-zero exits are all
//! encoded in the returned [`CommandOutput`] so callers can fall through to
//! the next strategy instead of unwinding.
//!
//! Two implementations are provided:
//!
//! - [`ProcessRunner`] spawns real processes with a hard timeout.
//! - [`ScriptedRunner`] answers from canned responses and records every call.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::CastLinkError;

/// Default budget for a single adb call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Minimum time granted to drain the pipes once the process has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Result record of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code. `None` when the process could not be started,
    /// was killed on timeout, or was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The budget that expired, when the process was killed on timeout.
    pub timed_out: Option<Duration>,
}

impl CommandOutput {
    /// A successful run with the given standard output.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::exited(0, stdout, "")
    }

    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            timed_out: None,
        }
    }

    pub fn timeout(command: &str, limit: Duration) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("'{}' timed out after {}s", command, limit.as_secs()),
            timed_out: Some(limit),
        }
    }

    fn not_started(reason: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: reason.into(),
            timed_out: None,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Standard output followed by standard error.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    /// Maps a failed run onto the error taxonomy. `None` for a clean exit.
    pub fn failure_kind(&self, command: &str) -> Option<CastLinkError> {
        if let Some(limit) = self.timed_out {
            return Some(CastLinkError::Timeout {
                command: command.to_string(),
                secs: limit.as_secs(),
            });
        }
        if self.success() {
            return None;
        }
        Some(CastLinkError::CommandFailed(
            format!("{}\n{}", self.stdout, self.stderr).trim().to_string(),
        ))
    }
}

/// Executes a full command line where `argv[0]` is the program.
pub trait CommandRunner: Send + Sync {
    fn run(&self, argv: &[String]) -> CommandOutput;

    /// Whether the program at `path` is present. Checked before any adb call.
    fn program_exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Runs real processes with a hard timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, argv: &[String]) -> CommandOutput {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutput::not_started("empty command line");
        };
        let line = argv.join(" ");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir_for(program) {
            command.current_dir(dir);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(command = %line, error = %err, "failed to start command");
                return CommandOutput::not_started(format!("failed to start '{}': {}", program, err));
            }
        };

        let stdout = child.stdout.take().map(read_in_background);
        let stderr = child.stderr.take().map(read_in_background);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if Instant::now() >= deadline => break None,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    warn!(command = %line, error = %err, "failed to poll command");
                    break None;
                }
            }
        };

        let Some(status) = status else {
            let _ = child.kill();
            let _ = child.wait();
            // Reader threads are left detached: a forked grandchild may still
            // hold the pipes open.
            warn!(command = %line, timeout_secs = self.timeout.as_secs(), "command timed out");
            return CommandOutput::timeout(&line, self.timeout);
        };

        // A grandchild that inherited the pipes (an adb server forked by
        // `adb devices`) keeps them open after the child exits. Collection is
        // bounded by the same deadline; whatever arrived by then is returned.
        let drain_deadline = deadline.max(Instant::now() + DRAIN_GRACE);
        let (stdout, stdout_closed) = drain(stdout, drain_deadline);
        let (stderr, stderr_closed) = drain(stderr, drain_deadline);
        if !(stdout_closed && stderr_closed) {
            warn!(command = %line, "output pipes still open after exit, keeping partial output");
        }

        let output = CommandOutput {
            exit_code: status.code(),
            stdout,
            stderr,
            timed_out: None,
        };
        debug!(command = %line, exit_code = ?output.exit_code, "command finished");
        output
    }
}

/// The directory holding `program`, when `program` is an absolute path.
pub fn working_dir_for(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if !path.is_absolute() {
        return None;
    }
    path.parent().map(Path::to_path_buf)
}

/// Decodes UTF-8, dropping invalid byte sequences instead of replacing them.
pub fn decode_permissive(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

fn read_in_background<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
    rx
}

/// Collects a reader's chunks until its pipe closes or `deadline` passes.
/// The flag is `false` when the deadline cut collection short.
fn drain(reader: Option<Receiver<Vec<u8>>>, deadline: Instant) -> (String, bool) {
    let Some(rx) = reader else {
        return (String::new(), true);
    };
    let mut bytes = Vec::new();
    let closed = loop {
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break true,
            Err(RecvTimeoutError::Timeout) => break false,
        }
    };
    (decode_permissive(&bytes), closed)
}

/// Answers commands from canned responses and records every invocation.
///
/// Responses are keyed by the arguments after the program, joined with single
/// spaces (`"devices -l"`, `"-s ABC shell getprop"`). Several responses for
/// the same key are consumed in order; the last one then repeats. A command
/// with no scripted response exits with code 1.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<String>>,
    tool_missing: bool,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner that reports the adb executable as absent.
    pub fn without_tool() -> Self {
        Self {
            tool_missing: true,
            ..Self::default()
        }
    }

    pub fn respond(&self, args: &str, output: CommandOutput) -> &Self {
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        responses.entry(args.to_string()).or_default().push_back(output);
        self
    }

    /// Every recorded invocation, program excluded, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self, args: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == args).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, argv: &[String]) -> CommandOutput {
        let key = argv.get(1..).unwrap_or_default().join(" ");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.clone());

        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        match responses.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(unscripted),
            Some(queue) => queue.front().cloned().unwrap_or_else(unscripted),
            None => unscripted(),
        }
    }

    fn program_exists(&self, _path: &Path) -> bool {
        !self.tool_missing
    }
}

fn unscripted() -> CommandOutput {
    CommandOutput::exited(1, "", "error: no scripted response")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_decode_drops_invalid_bytes() {
        assert_eq!(decode_permissive(b"ok\xff\xfe done"), "ok done");
        assert_eq!(decode_permissive("wlan0 ✓".as_bytes()), "wlan0 ✓");
    }

    #[test]
    fn test_working_dir_only_for_absolute_programs() {
        assert_eq!(working_dir_for("adb"), None);
        #[cfg(unix)]
        assert_eq!(
            working_dir_for("/opt/platform-tools/adb"),
            Some(PathBuf::from("/opt/platform-tools"))
        );
    }

    #[test]
    fn test_failure_kind() {
        assert_eq!(CommandOutput::ok("fine").failure_kind("adb devices"), None);
        assert!(matches!(
            CommandOutput::exited(1, "", "boom").failure_kind("adb usb"),
            Some(CastLinkError::CommandFailed(msg)) if msg == "boom"
        ));
        assert!(matches!(
            CommandOutput::timeout("adb usb", DEFAULT_TIMEOUT).failure_kind("adb usb"),
            Some(CastLinkError::Timeout { secs: 6, .. })
        ));
    }

    #[test]
    fn test_scripted_responses_are_consumed_then_repeat() {
        let runner = ScriptedRunner::new();
        runner
            .respond("devices -l", CommandOutput::ok("first"))
            .respond("devices -l", CommandOutput::ok("second"));

        let cmd = argv(&["adb", "devices", "-l"]);
        assert_eq!(runner.run(&cmd).stdout, "first");
        assert_eq!(runner.run(&cmd).stdout, "second");
        assert_eq!(runner.run(&cmd).stdout, "second");
        assert_eq!(runner.call_count("devices -l"), 3);

        let missing = runner.run(&argv(&["adb", "usb"]));
        assert_eq!(missing.exit_code, Some(1));
        assert_eq!(runner.calls().last().map(String::as_str), Some("usb"));
    }

    #[test]
    fn test_missing_program_does_not_panic() {
        let runner = ProcessRunner::default();
        let out = runner.run(&argv(&["/nonexistent/castlink-test/adb", "devices"]));
        assert_eq!(out.exit_code, None);
        assert_eq!(out.timed_out, None);
        assert!(out.stderr.contains("failed to start"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_captures_exit_code_and_output() {
        let runner = ProcessRunner::default();
        let out = runner.run(&argv(&["/bin/sh", "-c", "printf 'out\\377put'; echo err >&2; exit 3"]));
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, "output");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runs_in_program_directory() {
        let runner = ProcessRunner::default();
        let out = runner.run(&argv(&["/bin/sh", "-c", "pwd -P"]));
        let expected = Path::new("/bin").canonicalize().unwrap();
        assert_eq!(Path::new(out.stdout.trim()), expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_timeout_is_reported_not_raised() {
        let runner = ProcessRunner::new(Duration::from_millis(200));
        let started = Instant::now();
        let out = runner.run(&argv(&["/bin/sh", "-c", "sleep 5"]));
        assert_eq!(out.timed_out, Some(Duration::from_millis(200)));
        assert_eq!(out.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_background_grandchild_does_not_outlive_timeout() {
        let runner = ProcessRunner::new(Duration::from_millis(300));
        let started = Instant::now();
        let out = runner.run(&argv(&["/bin/sh", "-c", "sleep 8 & echo started"]));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.timed_out, None);
        assert_eq!(out.stdout.trim(), "started");
    }
}
