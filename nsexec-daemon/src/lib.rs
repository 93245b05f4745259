//! Process execution daemon core
//!
//! This crate implements the in-namespace side of process execution:
//! - Decode a process spec from a connection
//! - Resolve the requested user to credentials
//! - Allocate stdin/stdout/stderr/exit-status pipes and start the process
//! - Hand the client pipe ends back without waiting for the child
//! - Report the exit status from a background task
//!
//! Transport, process creation and user lookup are behind the
//! [`Listener`], [`ProcessRunner`] and [`UserLookup`] traits.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod daemon;
pub mod pipes;
pub mod report;
pub mod runner;
pub mod users;

pub use daemon::{ConnectionHandler, ContainerDaemon, DaemonState, Listener, RequestReader};
pub use pipes::{ClientEnds, PipeSet, Report, ServerEnds};
pub use runner::{LoggingRunner, MockRunner, PreparedCommand, ProcessRunner, SystemRunner};
pub use users::{PasswdUsers, StaticUsers, UserLookup};
