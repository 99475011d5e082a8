//! Platform command execution
//!
//! Recorder, player, frame grabber and enumeration tools are all external
//! binaries. Everything that spawns one goes through [`CommandRunner`] so the
//! hardware paths can be driven by a scripted runner in tests.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::device::DeviceRole;
use crate::{Error, Result};

/// Stderr fragments that mean another process holds the device
const BUSY_MARKERS: &[&str] = &["device or resource busy", "resource busy", "device busy"];

/// Stderr fragments that mean the device node is gone
const GONE_MARKERS: &[&str] = &["no such file or directory", "no such device"];

/// Captured result of a finished subprocess
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub status: Option<i32>,
    /// Raw stdout (may be audio bytes)
    pub stdout: Vec<u8>,
    /// Stderr decoded lossily
    pub stderr: String,
}

impl CommandOutput {
    /// Successful exit with the given stdout
    #[must_use]
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed exit with the given stderr
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with status 0
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout decoded lossily
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Pass a successful exit through, classify a failed one
    ///
    /// # Errors
    ///
    /// `DeviceBusy` when stderr says the device is held, `DeviceUnavailable`
    /// when the node is gone, `Audio` or `Vision` for anything else
    pub fn check_device(self, role: DeviceRole, tool: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }

        let stderr = self.stderr.trim();
        let detail = if stderr.is_empty() {
            format!("{tool} exited with {:?}", self.status)
        } else {
            format!("{tool}: {stderr}")
        };
        let lower = stderr.to_lowercase();

        if BUSY_MARKERS.iter().any(|m| lower.contains(m)) {
            return Err(Error::DeviceBusy { role, detail });
        }
        if GONE_MARKERS.iter().any(|m| lower.contains(m)) {
            return Err(Error::DeviceUnavailable {
                role,
                reason: detail,
            });
        }
        Err(match role {
            DeviceRole::Camera => Error::Vision(detail),
            DeviceRole::Microphone | DeviceRole::Speaker => Error::Audio(detail),
        })
    }
}

/// Runs external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion
    ///
    /// A non-zero exit is not an error here; callers classify stderr
    /// themselves. Only spawn failures are errors.
    ///
    /// # Errors
    ///
    /// Returns error if the program cannot be spawned
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Whether `program` can be found on this machine
    fn is_available(&self, program: &str) -> bool;
}

/// Runs programs on the host via `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        tracing::trace!(program, ?args, "spawning");

        // kill_on_drop: a timed-out attempt must not leave the device held
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::InvalidArgument(format!("{program} not installed"))
                }
                std::io::ErrorKind::PermissionDenied => {
                    Error::PermissionDenied(format!("cannot execute {program}"))
                }
                _ => Error::Io(e),
            })?;

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !stderr.is_empty() {
            tracing::debug!(program, stderr = %stderr.trim(), "command stderr");
        }

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr,
        })
    }

    fn is_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_helpers() {
        let ok = CommandOutput::ok("card 1");
        assert!(ok.success());
        assert_eq!(ok.stdout_text(), "card 1");

        let failed = CommandOutput::failed(1, "Device or resource busy");
        assert!(!failed.success());
        assert!(failed.stdout.is_empty());
    }

    #[test]
    fn classifies_device_failures() {
        let busy = CommandOutput::failed(1, "aplay: main:850: audio open error: Device or resource busy")
            .check_device(DeviceRole::Speaker, "aplay")
            .unwrap_err();
        assert!(busy.is_device_busy());
        assert!(busy.is_transient());

        let gone = CommandOutput::failed(1, "/dev/video0: No such file or directory")
            .check_device(DeviceRole::Camera, "ffmpeg")
            .unwrap_err();
        assert!(matches!(gone, Error::DeviceUnavailable { role: DeviceRole::Camera, .. }));
        assert!(!gone.is_transient());

        let other = CommandOutput::failed(2, "")
            .check_device(DeviceRole::Microphone, "arecord")
            .unwrap_err();
        assert!(matches!(other, Error::Audio(_)));

        assert!(CommandOutput::ok("").check_device(DeviceRole::Microphone, "arecord").is_ok());
    }

    #[tokio::test]
    async fn missing_program_is_not_transient() {
        let err = SystemRunner
            .run("robovoice-definitely-not-installed", &[])
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
