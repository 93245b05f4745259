//! Client side of the daemon socket

use std::fs::File;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixStream};
use std::path::PathBuf;

use nsexec_core::protocol::encode_request;
use nsexec_core::{Error, ExitStatus, FD_COUNT, ProcessSpec, Response, Result};

use crate::config::SocketConfig;
use crate::fd_passing::recv_with_fds;

/// Buffer for the first chunk of a response
const RESPONSE_BUFFER: usize = 64 * 1024;

/// Open handles on a process started by the daemon
#[derive(Debug)]
pub struct ProcessHandles {
    /// Child's stdin
    pub stdin: File,
    /// Child's stdout
    pub stdout: File,
    /// Child's stderr, plus daemon diagnostics
    pub stderr: File,
    /// Exit-status pipe
    pub exit_status: File,
}

impl ProcessHandles {
    /// Build from descriptors in role order
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] unless exactly four descriptors are given
    pub fn from_fds(fds: Vec<OwnedFd>) -> Result<Self> {
        let [stdin, stdout, stderr, exit_status]: [OwnedFd; FD_COUNT] =
            fds.try_into().map_err(|fds: Vec<OwnedFd>| Error::Protocol {
                message: format!("expected {FD_COUNT} descriptors, received {}", fds.len()),
            })?;

        Ok(Self {
            stdin: File::from(stdin),
            stdout: File::from(stdout),
            stderr: File::from(stderr),
            exit_status: File::from(exit_status),
        })
    }

    /// Read the exit status from an exit-status pipe
    ///
    /// Exactly one byte followed by end-of-stream is a reported status.
    /// End-of-stream with no byte means the daemon failed to report.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] for zero or more than one byte
    pub fn read_exit_status(reader: impl Read) -> Result<ExitStatus> {
        let mut buf = Vec::with_capacity(2);
        reader.take(2).read_to_end(&mut buf)?;

        match buf.as_slice() {
            [code] => Ok(ExitStatus::from_raw(*code)),
            [] => Err(Error::Protocol {
                message: "exit status was not reported".to_string(),
            }),
            _ => Err(Error::Protocol {
                message: "unexpected data after exit status".to_string(),
            }),
        }
    }
}

/// Connects to a daemon socket and submits process specs
#[derive(Debug, Clone)]
pub struct SocketConnector {
    config: SocketConfig,
}

impl SocketConnector {
    /// Create a connector for the socket described by `config`
    #[must_use]
    pub const fn new(config: SocketConfig) -> Self {
        Self { config }
    }

    /// Create a connector for a socket path (or `@name`)
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self::new(SocketConfig::new().with_path(path))
    }

    fn open(&self) -> Result<UnixStream> {
        let stream = match self.config.abstract_name() {
            Some(name) => UnixStream::connect_addr(&SocketAddr::from_abstract_name(name)?),
            None => UnixStream::connect(&self.config.path),
        };

        stream.map_err(|e| Error::Listener {
            message: format!("connecting to {}: {e}", self.config.path.display()),
        })
    }

    /// Submit a spec and receive handles on the started process
    ///
    /// # Errors
    /// Returns [`Error::Remote`] if the daemon refused the request, or a
    /// connection/protocol error
    pub fn connect(&self, spec: &ProcessSpec) -> Result<ProcessHandles> {
        let mut stream = self.open()?;

        stream.write_all(&encode_request(spec)?)?;
        stream.shutdown(Shutdown::Write)?;

        let mut buf = vec![0u8; RESPONSE_BUFFER];
        let (n, fds) = recv_with_fds(stream.as_raw_fd(), &mut buf)?;
        buf.truncate(n);
        stream.read_to_end(&mut buf)?;

        if buf.is_empty() {
            return Err(Error::Protocol {
                message: "daemon closed the connection without a response".to_string(),
            });
        }

        let response: Response = serde_json::from_slice(&buf)?;
        response.into_result()?;

        tracing::debug!(path = %spec.path, "Process started by daemon");
        ProcessHandles::from_fds(fds)
    }
}
