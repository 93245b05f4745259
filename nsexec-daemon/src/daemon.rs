//! Daemon lifecycle and connection handling
//!
//! Lifecycle is two-phase: [`ContainerDaemon::init`] must run
//! while the host's filesystem view is still visible (so the socket file
//! lands in the right place), [`ContainerDaemon::run`] may run after the
//! execution context has been isolated.

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use nsexec_core::protocol::{MAX_REQUEST_BYTES, decode_request, next_request};
use nsexec_core::{Credentials, Error, ProcessEvent, ProcessSpec, Result};

use crate::pipes::{ClientEnds, PipeSet};
use crate::report::report_exit_status;
use crate::runner::{PreparedCommand, ProcessRunner};
use crate::users::UserLookup;

/// Request stream handed to a [`ConnectionHandler`]
pub type RequestReader<'a> = dyn AsyncBufRead + Unpin + Send + 'a;

/// Handles one accepted connection
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Decode one request and start it, returning the caller's pipe ends
    ///
    /// # Errors
    /// Returns error if the request cannot be decoded, resolved or started
    async fn handle(&self, request: &mut RequestReader<'_>) -> Result<ClientEnds>;
}

/// Socket lifecycle the daemon drives
///
/// The daemon never depends on a concrete transport; a filesystem-path
/// socket and an abstract-namespace socket are both just listeners.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Create the socket; runs in the host's filesystem view
    ///
    /// # Errors
    /// Returns error if the socket cannot be created
    async fn init(&self) -> Result<()>;

    /// Accept connections until stopped, passing each to the handler
    ///
    /// # Errors
    /// Returns error if accepting fails unrecoverably
    async fn listen(&self, handler: Arc<dyn ConnectionHandler>) -> Result<()>;

    /// Stop accepting and release the socket
    ///
    /// # Errors
    /// Returns error if the socket cannot be released
    async fn stop(&self) -> Result<()>;
}

/// Lifecycle states of the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// Created, listener not initialized
    Uninitialized,
    /// Listener initialized, not yet accepting
    Initialized,
    /// Accepting connections
    Running,
    /// Listener returned on its own; resources not yet released
    Finished,
    /// Stopped; terminal
    Stopped,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// The process execution daemon
///
/// Requests are independent: the only state shared between connections is
/// the listener, the user lookup and the runner, all of which must be safe
/// for concurrent use.
pub struct ContainerDaemon {
    listener: Arc<dyn Listener>,
    users: Arc<dyn UserLookup>,
    runner: Arc<dyn ProcessRunner>,
    state: Mutex<DaemonState>,
}

impl ContainerDaemon {
    /// Create a daemon over the given collaborators
    #[must_use]
    pub fn new(
        listener: Arc<dyn Listener>,
        users: Arc<dyn UserLookup>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            listener,
            users,
            runner,
            state: Mutex::new(DaemonState::Uninitialized),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> DaemonState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(
        &self,
        operation: &'static str,
        from: DaemonState,
        to: DaemonState,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(Error::InvalidState {
                operation,
                state: state.to_string(),
            });
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: DaemonState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }

    /// Initialize the listener
    ///
    /// Must be called from the host namespace, before the filesystem view
    /// changes, so the socket file is created where callers can reach it.
    ///
    /// # Errors
    /// Returns [`Error::Listener`] if the listener cannot be initialized,
    /// which is fatal to startup
    pub async fn init(&self) -> Result<()> {
        self.transition("init", DaemonState::Uninitialized, DaemonState::Initialized)?;

        if let Err(e) = self.listener.init().await {
            self.set_state(DaemonState::Uninitialized);
            tracing::error!(error = %e, "Failed to initialize listener");
            return Err(Error::Listener {
                message: format!("initializing the listener: {e}"),
            });
        }

        tracing::info!("Daemon initialized");
        Ok(())
    }

    /// Accept connections until the listener shuts down
    ///
    /// Returns immediately if [`stop`](Self::stop) already ran.
    ///
    /// # Errors
    /// Returns [`Error::Listener`] if listening fails, or
    /// [`Error::InvalidState`] if [`init`](Self::init) has not run
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                DaemonState::Initialized => *state = DaemonState::Running,
                DaemonState::Stopped => {
                    tracing::debug!("Daemon stopped before it ran");
                    return Ok(());
                }
                other => {
                    return Err(Error::InvalidState {
                        operation: "run",
                        state: other.to_string(),
                    });
                }
            }
        }
        tracing::info!("Daemon running");

        let handler: Arc<dyn ConnectionHandler> = Arc::clone(self) as Arc<dyn ConnectionHandler>;
        let result = self.listener.listen(handler).await;
        {
            // A concurrent stop has already released the listener.
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == DaemonState::Running {
                *state = DaemonState::Finished;
            }
        }

        match result {
            Ok(()) => {
                tracing::info!("Daemon stopped accepting connections");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Listener failed");
                Err(Error::Listener {
                    message: format!("listening for connections: {e}"),
                })
            }
        }
    }

    /// Stop the listener
    ///
    /// The listener is released exactly once, including after `run`
    /// returned on its own. Calling this again is a no-op. Processes
    /// already started keep running and are still reported.
    ///
    /// # Errors
    /// Returns [`Error::Listener`] if the listener cannot be stopped
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == DaemonState::Stopped {
                tracing::debug!("Daemon already stopped");
                return Ok(());
            }
            *state = DaemonState::Stopped;
        }

        self.listener.stop().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to stop listener");
            Error::Listener {
                message: format!("stopping the listener: {e}"),
            }
        })?;

        tracing::info!("Daemon stopped");
        Ok(())
    }

    /// Resolve a user name to credentials
    ///
    /// An empty name is refused rather than mapped to a default identity.
    async fn resolve_user(&self, name: &str) -> Result<Credentials> {
        if name.is_empty() {
            return Err(Error::UnknownUser {
                user: String::new(),
            });
        }

        match self.users.lookup(name).await {
            Ok(Some(record)) => Ok(record.credentials()),
            Ok(None) => Err(Error::UnknownUser {
                user: name.to_string(),
            }),
            Err(e @ Error::UserLookup { .. }) => Err(e),
            Err(e) => Err(Error::UserLookup {
                user: name.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Start a decoded spec, returning the caller's pipe ends
    async fn start(&self, spec: &ProcessSpec) -> Result<ClientEnds> {
        let credentials = self.resolve_user(&spec.user).await?;

        let (client, server) = PipeSet::new()?.into_parts();

        let mut command = PreparedCommand::new(spec, credentials)?;
        command.wire_stdio(server.child_stdio()?);

        // On failure every pipe end is dropped, and so closed, here.
        self.runner.start(&mut command).await.map_err(|e| match e {
            Error::Start { .. } => e,
            other => Error::Start {
                path: spec.path.clone(),
                message: other.to_string(),
            },
        })?;

        ProcessEvent::Started {
            path: spec.path.clone(),
            pid: command.pid(),
            credentials,
            timestamp: SystemTime::now(),
        }
        .emit_trace();

        tokio::spawn(report_exit_status(
            Arc::clone(&self.runner),
            command,
            server,
        ));

        Ok(client)
    }
}

impl fmt::Debug for ContainerDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerDaemon")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Read one request and decode it
///
/// The request is a single self-delimiting JSON value: reading stops as
/// soon as one complete value has arrived, however it is split across
/// lines or reads. End of stream before that is an incomplete request.
async fn read_request(request: &mut RequestReader<'_>) -> Result<ProcessSpec> {
    let mut frame = Vec::new();

    loop {
        let read = {
            let chunk = request.fill_buf().await?;
            let room = MAX_REQUEST_BYTES + 1 - frame.len();
            let n = chunk.len().min(room);
            frame.extend_from_slice(&chunk[..n]);
            n
        };

        if read == 0 {
            return decode_request(&frame);
        }
        request.consume(read);

        let window = &frame[..frame.len().min(MAX_REQUEST_BYTES)];
        if let Some(spec) = next_request(window)? {
            return Ok(spec);
        }

        if frame.len() > MAX_REQUEST_BYTES {
            return Err(Error::Decode {
                message: format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
            });
        }
    }
}

#[async_trait]
impl ConnectionHandler for ContainerDaemon {
    async fn handle(&self, request: &mut RequestReader<'_>) -> Result<ClientEnds> {
        let mut path = String::new();

        let result = match read_request(request).await {
            Ok(spec) => {
                path.clone_from(&spec.path);
                self.start(&spec).await
            }
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            ProcessEvent::Rejected {
                path,
                kind: e.kind().to_string(),
                message: e.to_string(),
                timestamp: SystemTime::now(),
            }
            .emit_trace();
        }

        result
    }
}
