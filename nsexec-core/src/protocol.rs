//! Wire format shared by the daemon and its clients
//!
//! Requests are one JSON-encoded [`ProcessSpec`] per connection. The value
//! delimits itself; newlines inside or after it carry no meaning.
//! Responses are one JSON [`Response`] with the client pipe ends attached
//! as ancillary data.

use serde::{Deserialize, Serialize};

use crate::{Error, ProcessSpec, Result};

/// Number of descriptors handed back for every started process
///
/// Fixed order: stdin (write), stdout (read), stderr (read), exit status (read).
pub const FD_COUNT: usize = 4;

/// Upper bound on an encoded request
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Decode one request from a complete frame
///
/// # Errors
/// Returns [`Error::IncompleteRequest`] when the frame is empty or stops in
/// the middle of a value, and [`Error::Decode`] for anything else that is
/// not a valid spec.
pub fn decode_request(frame: &[u8]) -> Result<ProcessSpec> {
    if frame.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::IncompleteRequest {
            message: "connection closed before a request was sent".to_string(),
        });
    }

    let spec: ProcessSpec = serde_json::from_slice(frame).map_err(|e| {
        if e.is_eof() {
            Error::IncompleteRequest {
                message: e.to_string(),
            }
        } else {
            Error::Decode {
                message: e.to_string(),
            }
        }
    })?;

    spec.validate()?;
    Ok(spec)
}

/// Decode the first request in a buffer that may still be growing
///
/// Returns `Ok(None)` while the buffer holds only whitespace or the start
/// of a value. Anything after the first complete value is ignored.
///
/// # Errors
/// Returns [`Error::Decode`] as soon as the buffer cannot be the start of
/// a valid spec
pub fn next_request(buf: &[u8]) -> Result<Option<ProcessSpec>> {
    let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<ProcessSpec>();

    match values.next() {
        None => Ok(None),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(Error::Decode {
            message: e.to_string(),
        }),
        Some(Ok(spec)) => {
            spec.validate()?;
            Ok(Some(spec))
        }
    }
}

/// Encode a request as a newline-terminated frame
///
/// # Errors
/// Returns error if the spec cannot be serialized
pub fn encode_request(spec: &ProcessSpec) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(spec)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Error carried back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Error class, see [`Error::kind`]
    pub kind: String,
    /// Human readable message
    pub message: String,
}

impl From<&Error> for ErrorReply {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Daemon reply to a request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Response {
    /// Set when the request failed; no descriptors are attached then
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReply>,
}

impl Response {
    /// Successful reply
    #[must_use]
    pub const fn success() -> Self {
        Self { error: None }
    }

    /// Failed reply
    #[must_use]
    pub fn failure(err: &Error) -> Self {
        Self {
            error: Some(ErrorReply::from(err)),
        }
    }

    /// Turn the reply back into a result
    ///
    /// # Errors
    /// Returns [`Error::Remote`] if the daemon reported an error
    pub fn into_result(self) -> Result<()> {
        match self.error {
            None => Ok(()),
            Some(reply) => Err(Error::Remote {
                kind: reply.kind,
                message: reply.message,
            }),
        }
    }
}
