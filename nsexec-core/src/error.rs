//! Error types for nsexec

use thiserror::Error;

/// nsexec error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request could not be decoded into a process spec
    #[error("Decode failed: {message}")]
    Decode {
        /// Error message
        message: String,
    },

    /// Connection ended before one complete request arrived
    #[error("Incomplete request: {message}")]
    IncompleteRequest {
        /// Error message
        message: String,
    },

    /// Requested user has no record
    #[error("Failed to lookup user '{user}'")]
    UnknownUser {
        /// Requested user name
        user: String,
    },

    /// The user lookup mechanism itself failed
    #[error("Lookup user '{user}': {message}")]
    UserLookup {
        /// Requested user name
        user: String,
        /// Underlying cause
        message: String,
    },

    /// Pipe allocation failed
    #[error("Failed to create pipe: {0}")]
    PipeCreation(#[source] std::io::Error),

    /// Process could not be started
    #[error("Running command '{path}': {message}")]
    Start {
        /// Executable path
        path: String,
        /// Error message
        message: String,
    },

    /// Waiting for a started process failed
    #[error("Wait failed: {message}")]
    Wait {
        /// Error message
        message: String,
    },

    /// Listener setup, accept or shutdown failed
    #[error("Listener error: {message}")]
    Listener {
        /// Error message
        message: String,
    },

    /// Lifecycle operation called in the wrong state
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the daemon was in
        state: String,
    },

    /// Remote side replied with an error
    #[error("Remote {kind} error: {message}")]
    Remote {
        /// Error class reported by the daemon
        kind: String,
        /// Error message
        message: String,
    },

    /// Protocol violation on the wire
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message
        message: String,
    },

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short, stable name of the error class
    ///
    /// This is what travels back to a remote caller next to the message.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Decode { .. } | Self::IncompleteRequest { .. } => "decode",
            Self::UnknownUser { .. } | Self::UserLookup { .. } => "credential",
            Self::PipeCreation(_) => "resource",
            Self::Start { .. } => "start",
            Self::Wait { .. } => "wait",
            Self::Listener { .. } => "listener",
            Self::InvalidState { .. } => "state",
            Self::Remote { kind, .. } => kind,
            Self::Protocol { .. } | Self::Json(_) => "protocol",
            Self::Io(_) | Self::System(_) => "system",
        }
    }

    /// Check if this is a credential error
    #[must_use]
    pub const fn is_credential(&self) -> bool {
        matches!(self, Self::UnknownUser { .. } | Self::UserLookup { .. })
    }
}

/// Result type alias for nsexec operations
pub type Result<T> = std::result::Result<T, Error>;
