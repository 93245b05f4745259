//! Process runner trait for pluggable process creation
//!
//! The daemon prepares a [`PreparedCommand`] and hands it to a
//! [`ProcessRunner`] to start and later wait on. This allows for:
//! - [`SystemRunner`] - Real child processes
//! - [`LoggingRunner`] - Tracing around any other runner
//! - [`MockRunner`] - Testing without spawning anything

use async_trait::async_trait;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify};

use nsexec_core::{Credentials, Error, ExitStatus, ProcessSpec, Result};

/// A command built from a process spec and resolved credentials
///
/// Owned by the daemon for as long as the child runs and discarded once
/// its exit status has been collected.
#[derive(Debug)]
pub struct PreparedCommand {
    path: String,
    args: Vec<String>,
    credentials: Credentials,
    command: Command,
    child: Option<Child>,
}

impl PreparedCommand {
    /// Build a command that runs as the given credentials
    ///
    /// stdio defaults to `/dev/null` until [`wire_stdio`](Self::wire_stdio)
    /// is called.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] if the spec carries malformed env entries
    pub fn new(spec: &ProcessSpec, credentials: Credentials) -> Result<Self> {
        let mut command = Command::new(&spec.path);
        command
            .args(&spec.args)
            .envs(spec.env_pairs()?)
            .uid(credentials.uid)
            .gid(credentials.gid)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(ref dir) = spec.dir {
            command.current_dir(dir);
        }

        Ok(Self {
            path: spec.path.clone(),
            args: spec.args.clone(),
            credentials,
            command,
            child: None,
        })
    }

    /// Connect the child's stdin, stdout and stderr
    pub fn wire_stdio(&mut self, (stdin, stdout, stderr): (Stdio, Stdio, Stdio)) {
        self.command.stdin(stdin).stdout(stdout).stderr(stderr);
    }

    /// Executable path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Arguments
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Credentials the child runs with
    #[must_use]
    pub const fn credentials(&self) -> Credentials {
        self.credentials
    }

    /// PID of the started child, if any
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Check if the child has been spawned
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.child.is_some()
    }

    /// Spawn the child process
    ///
    /// # Errors
    /// Returns [`Error::Start`] if the process cannot be spawned or was
    /// already spawned
    pub fn spawn(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Err(Error::Start {
                path: self.path.clone(),
                message: "process already started".to_string(),
            });
        }

        let child = self.command.spawn().map_err(|e| Error::Start {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        self.child = Some(child);
        Ok(())
    }

    /// Wait for the spawned child to terminate
    ///
    /// A child killed by a signal reports `128 + signal`.
    ///
    /// # Errors
    /// Returns [`Error::Wait`] if nothing was spawned or the wait fails
    pub async fn wait_child(&mut self) -> Result<ExitStatus> {
        let child = self.child.as_mut().ok_or_else(|| Error::Wait {
            message: format!("{} was never started", self.path),
        })?;

        let status = child.wait().await.map_err(|e| Error::Wait {
            message: e.to_string(),
        })?;

        if let Some(code) = status.code() {
            Ok(ExitStatus::from_code(code))
        } else if let Some(signal) = status.signal() {
            Ok(ExitStatus::from_signal(signal))
        } else {
            Err(Error::Wait {
                message: format!("unrecognised wait status: {status}"),
            })
        }
    }
}

/// Trait for process runners
///
/// # Thread Safety
/// All implementations must be `Send + Sync`; the daemon calls them from
/// many connection tasks at once.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Start a prepared command
    ///
    /// # Errors
    /// Returns error if the process cannot be started
    async fn start(&self, command: &mut PreparedCommand) -> Result<()>;

    /// Wait for a started command to terminate
    ///
    /// # Errors
    /// Returns error if the exit status cannot be determined
    async fn wait(&self, command: &mut PreparedCommand) -> Result<ExitStatus>;
}

/// Runner that spawns real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn start(&self, command: &mut PreparedCommand) -> Result<()> {
        command.spawn()
    }

    async fn wait(&self, command: &mut PreparedCommand) -> Result<ExitStatus> {
        command.wait_child().await
    }
}

/// Runner decorator that traces every start and wait
#[derive(Debug, Clone, Default)]
pub struct LoggingRunner<R> {
    inner: R,
}

impl<R: ProcessRunner> LoggingRunner<R> {
    /// Wrap a runner
    #[must_use]
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Get the wrapped runner
    #[must_use]
    pub const fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: ProcessRunner> ProcessRunner for LoggingRunner<R> {
    async fn start(&self, command: &mut PreparedCommand) -> Result<()> {
        tracing::debug!(
            path = %command.path(),
            args = ?command.args(),
            uid = command.credentials().uid,
            gid = command.credentials().gid,
            "Starting process"
        );

        match self.inner.start(command).await {
            Ok(()) => {
                tracing::debug!(path = %command.path(), pid = ?command.pid(), "Process started");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(path = %command.path(), error = %e, "Failed to start process");
                Err(e)
            }
        }
    }

    async fn wait(&self, command: &mut PreparedCommand) -> Result<ExitStatus> {
        let pid = command.pid();
        tracing::debug!(path = %command.path(), pid = ?pid, "Waiting for process");

        let result = self.inner.wait(command).await;
        match &result {
            Ok(status) => tracing::debug!(
                path = %command.path(),
                pid = ?pid,
                exit_status = status.as_raw(),
                "Process terminated"
            ),
            Err(e) => tracing::warn!(
                path = %command.path(),
                pid = ?pid,
                error = %e,
                "Failed to wait for process"
            ),
        }
        result
    }
}

/// Mock runner for testing (never spawns a process)
///
/// # Example
/// ```
/// use nsexec_core::{Credentials, ExitStatus, ProcessSpec};
/// use nsexec_daemon::{MockRunner, PreparedCommand, ProcessRunner};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let runner = MockRunner::new().with_exit_status(ExitStatus::from_raw(3));
/// let spec = ProcessSpec::new("/bin/true");
/// let mut command = PreparedCommand::new(&spec, Credentials::current()).unwrap();
///
/// runner.start(&mut command).await.unwrap();
/// assert_eq!(runner.wait(&mut command).await.unwrap().as_raw(), 3);
/// assert_eq!(runner.started().await, vec!["/bin/true".to_string()]);
/// # });
/// ```
#[derive(Clone)]
pub struct MockRunner {
    state: Arc<Mutex<MockState>>,
    release: Arc<Notify>,
}

#[derive(Default)]
struct MockState {
    start_error: Option<String>,
    wait_error: Option<String>,
    exit_status: Option<ExitStatus>,
    hold_wait: bool,
    started: Vec<String>,
    start_calls: usize,
    wait_calls: usize,
}

impl MockRunner {
    /// Create a mock runner whose processes exit with status 0
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            release: Arc::new(Notify::new()),
        }
    }

    /// Fail every start with the given message
    #[must_use]
    pub fn with_start_error(self, message: impl Into<String>) -> Self {
        self.configure(|state| state.start_error = Some(message.into()))
    }

    /// Fail every wait with the given message
    #[must_use]
    pub fn with_wait_error(self, message: impl Into<String>) -> Self {
        self.configure(|state| state.wait_error = Some(message.into()))
    }

    /// Report this exit status from every wait
    #[must_use]
    pub fn with_exit_status(self, status: ExitStatus) -> Self {
        self.configure(|state| state.exit_status = Some(status))
    }

    /// Block waits until [`release_wait`](Self::release_wait) is called
    #[must_use]
    pub fn with_held_wait(self) -> Self {
        self.configure(|state| state.hold_wait = true)
    }

    fn configure(self, apply: impl FnOnce(&mut MockState)) -> Self {
        // Builders run before the runner is shared, so the lock is free.
        if let Ok(mut state) = self.state.try_lock() {
            apply(&mut state);
        }
        self
    }

    /// Let one held wait complete
    pub fn release_wait(&self) {
        self.release.notify_one();
    }

    /// Paths of the commands started so far
    pub async fn started(&self) -> Vec<String> {
        self.state.lock().await.started.clone()
    }

    /// Number of start calls made
    pub async fn start_calls(&self) -> usize {
        self.state.lock().await.start_calls
    }

    /// Number of wait calls made
    pub async fn wait_calls(&self) -> usize {
        self.state.lock().await.wait_calls
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRunner").finish_non_exhaustive()
    }
}

#[async_trait]
impl ProcessRunner for MockRunner {
    async fn start(&self, command: &mut PreparedCommand) -> Result<()> {
        let mut state = self.state.lock().await;
        state.start_calls += 1;

        if let Some(ref message) = state.start_error {
            tracing::debug!(path = %command.path(), "Mock: Start failed");
            return Err(Error::Start {
                path: command.path().to_string(),
                message: message.clone(),
            });
        }

        state.started.push(command.path().to_string());
        tracing::debug!(path = %command.path(), "Mock: Started process");

        Ok(())
    }

    async fn wait(&self, command: &mut PreparedCommand) -> Result<ExitStatus> {
        let hold = {
            let mut state = self.state.lock().await;
            state.wait_calls += 1;
            state.hold_wait
        };

        if hold {
            self.release.notified().await;
        }

        let state = self.state.lock().await;
        tracing::debug!(path = %command.path(), "Mock: Wait returned");

        match state.wait_error {
            Some(ref message) => Err(Error::Wait {
                message: message.clone(),
            }),
            None => Ok(state.exit_status.unwrap_or(ExitStatus::SUCCESS)),
        }
    }
}
