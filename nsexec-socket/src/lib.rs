//! Unix socket transport for the nsexec daemon
//!
//! This crate provides the concrete [`Listener`](nsexec_daemon::Listener)
//! the daemon runs behind, and the matching client:
//! - [`UnixSocketListener`] - Bind, accept, reply with `SCM_RIGHTS`
//! - [`SocketConnector`] - Submit a spec, receive four pipe ends

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod connector;
pub mod fd_passing;
pub mod listener;

pub use config::SocketConfig;
pub use connector::{ProcessHandles, SocketConnector};
pub use listener::UnixSocketListener;
