//! Four-channel pipe sets
//!
//! Every request gets a fresh [`PipeSet`]: stdin, stdout, stderr and an
//! exit-status pipe. Each pipe has a client end, which is handed to the
//! caller, and a server end, which the daemon keeps until the child's
//! outcome has been reported. All ends are owned descriptors, so dropping
//! a half-built set closes everything created so far.

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::process::Stdio;

use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use nsexec_core::{Error, ExitStatus, FD_COUNT, Result};

/// Prefix for diagnostics written to the stderr pipe
const DIAGNOSTIC_PREFIX: &str = "nsexec";

/// Create one close-on-exec pipe, returning `(read, write)`
fn create_pipe() -> Result<(OwnedFd, OwnedFd)> {
    pipe2(OFlag::O_CLOEXEC).map_err(|e| Error::PipeCreation(e.into()))
}

/// The full set of pipes for one request
#[derive(Debug)]
pub struct PipeSet {
    client: ClientEnds,
    server: ServerEnds,
}

impl PipeSet {
    /// Allocate all four pipes
    ///
    /// Pipes are close-on-exec so a child started for another request
    /// never inherits them.
    ///
    /// # Errors
    /// Returns [`Error::PipeCreation`] if any pipe cannot be created. Pipes
    /// created before the failure are closed.
    pub fn new() -> Result<Self> {
        let (stdin_r, stdin_w) = create_pipe()?;
        let (stdout_r, stdout_w) = create_pipe()?;
        let (stderr_r, stderr_w) = create_pipe()?;
        let (exit_r, exit_w) = create_pipe()?;

        tracing::trace!(
            stdin = stdin_r.as_raw_fd(),
            stdout = stdout_w.as_raw_fd(),
            stderr = stderr_w.as_raw_fd(),
            exit_status = exit_w.as_raw_fd(),
            "Allocated pipe set"
        );

        Ok(Self {
            client: ClientEnds {
                stdin: stdin_w,
                stdout: stdout_r,
                stderr: stderr_r,
                exit_status: exit_r,
            },
            server: ServerEnds {
                stdin: stdin_r,
                stdout: stdout_w,
                stderr: File::from(stderr_w),
                exit_status: File::from(exit_w),
            },
        })
    }

    /// Split into the caller's ends and the daemon's ends
    #[must_use]
    pub fn into_parts(self) -> (ClientEnds, ServerEnds) {
        (self.client, self.server)
    }
}

/// Pipe ends handed to the caller
///
/// Role order is fixed: stdin (write), stdout (read), stderr (read),
/// exit status (read).
#[derive(Debug)]
pub struct ClientEnds {
    stdin: OwnedFd,
    stdout: OwnedFd,
    stderr: OwnedFd,
    exit_status: OwnedFd,
}

impl ClientEnds {
    /// Write end of the child's stdin
    #[must_use]
    pub const fn stdin(&self) -> &OwnedFd {
        &self.stdin
    }

    /// Read end of the child's stdout
    #[must_use]
    pub const fn stdout(&self) -> &OwnedFd {
        &self.stdout
    }

    /// Read end of the child's stderr
    #[must_use]
    pub const fn stderr(&self) -> &OwnedFd {
        &self.stderr
    }

    /// Read end of the exit-status pipe
    #[must_use]
    pub const fn exit_status(&self) -> &OwnedFd {
        &self.exit_status
    }

    /// Raw descriptors in role order, for ancillary-data transfer
    #[must_use]
    pub fn as_raw_fds(&self) -> [RawFd; FD_COUNT] {
        [
            self.stdin.as_raw_fd(),
            self.stdout.as_raw_fd(),
            self.stderr.as_raw_fd(),
            self.exit_status.as_raw_fd(),
        ]
    }

    /// Take ownership of the descriptors in role order
    #[must_use]
    pub fn into_array(self) -> [OwnedFd; FD_COUNT] {
        [self.stdin, self.stdout, self.stderr, self.exit_status]
    }

    /// Convert into files in role order
    #[must_use]
    pub fn into_files(self) -> [File; FD_COUNT] {
        self.into_array().map(File::from)
    }
}

/// Pipe ends kept by the daemon while the child runs
///
/// Dropping this releases every server end exactly once, in field order:
/// stdin, stdout, stderr, exit status.
#[derive(Debug)]
pub struct ServerEnds {
    stdin: OwnedFd,
    stdout: OwnedFd,
    stderr: File,
    exit_status: File,
}

/// Outcome of reporting a completed process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Status byte that was (or should have been) written
    pub status: ExitStatus,
    /// Whether the status byte reached the exit-status pipe
    pub delivered: bool,
    /// Problems hit while reporting
    pub errors: Vec<String>,
}

impl ServerEnds {
    /// Duplicates of the child-facing ends for the command's stdio
    ///
    /// The originals stay here so the daemon controls when they close.
    ///
    /// # Errors
    /// Returns [`Error::PipeCreation`] if a descriptor cannot be duplicated
    pub fn child_stdio(&self) -> Result<(Stdio, Stdio, Stdio)> {
        let stdin = self.stdin.try_clone().map_err(Error::PipeCreation)?;
        let stdout = self.stdout.try_clone().map_err(Error::PipeCreation)?;
        let stderr = self.stderr.try_clone().map_err(Error::PipeCreation)?;

        Ok((stdin.into(), stdout.into(), stderr.into()))
    }

    /// Write the single exit-status byte
    ///
    /// # Errors
    /// Returns error if the byte cannot be written
    pub fn write_exit_status(&self, status: ExitStatus) -> std::io::Result<()> {
        (&self.exit_status).write_all(&[status.as_raw()])
    }

    /// Best-effort diagnostic on the stderr pipe
    ///
    /// Returns whether the message was written; a failure only loses it.
    pub fn report_error(&self, message: &str) -> bool {
        let line = format!("{DIAGNOSTIC_PREFIX}: {message}\n");
        (&self.stderr).write_all(line.as_bytes()).is_ok()
    }

    /// Report the outcome of a wait, then release every server end
    ///
    /// A failed wait is reported as [`ExitStatus::UNKNOWN`] with a
    /// diagnostic on stderr. A failed status write is reported on stderr
    /// the same way. The ends are released on every path.
    pub fn report(self, outcome: Result<ExitStatus>) -> Report {
        let mut errors = Vec::new();

        let status = match outcome {
            Ok(status) => status,
            Err(e) => {
                let message = match e {
                    Error::Wait { .. } => e.to_string(),
                    other => format!("Wait failed: {other}"),
                };
                self.report_error(&message);
                errors.push(message);
                ExitStatus::UNKNOWN
            }
        };

        let delivered = match self.write_exit_status(status) {
            Ok(()) => true,
            Err(e) => {
                let message = format!("Failed to write exit status: {e}");
                self.report_error(&message);
                errors.push(message);
                false
            }
        };

        self.release();

        Report {
            status,
            delivered,
            errors,
        }
    }

    /// Close every server end
    pub fn release(self) {
        tracing::trace!(
            stdin = self.stdin.as_raw_fd(),
            exit_status = self.exit_status.as_raw_fd(),
            "Releasing server pipe ends"
        );
        drop(self);
    }
}
