//! nsexec Core - Foundation types, events, and wire format
//!
//! This crate provides the types shared by the process execution daemon,
//! its transports and its clients.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;
pub mod protocol;
pub mod types;

pub use error::{Error, Result};
pub use events::ProcessEvent;
pub use protocol::{ErrorReply, Response, FD_COUNT};
pub use types::{Credentials, ExitStatus, ProcessSpec, UserRecord};
