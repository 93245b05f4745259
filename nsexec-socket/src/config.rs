//! Socket configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default socket location inside the execution context
pub const DEFAULT_SOCKET_PATH: &str = "/run/nsexec/daemon.sock";

/// Default permission bits for the socket file
pub const DEFAULT_SOCKET_MODE: u32 = 0o700;

/// Where and how the daemon socket is created
///
/// A path starting with `@` names a Linux abstract-namespace socket; no
/// file is created for it and `mode` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Socket path, or `@name` for an abstract socket
    pub path: PathBuf,

    /// Permission bits applied to the socket file
    #[serde(default = "default_mode")]
    pub mode: u32,
}

const fn default_mode() -> u32 {
    DEFAULT_SOCKET_MODE
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_SOCKET_PATH),
            mode: DEFAULT_SOCKET_MODE,
        }
    }
}

impl SocketConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the socket file permission bits
    #[must_use]
    pub const fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Abstract socket name, if the path names one
    #[must_use]
    pub fn abstract_name(&self) -> Option<&[u8]> {
        use std::os::unix::ffi::OsStrExt;

        self.path.as_os_str().as_bytes().strip_prefix(b"@")
    }

    /// Filesystem path of the socket, if it has one
    #[must_use]
    pub fn fs_path(&self) -> Option<&Path> {
        if self.abstract_name().is_some() {
            None
        } else {
            Some(&self.path)
        }
    }
}
