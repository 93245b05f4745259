//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{Error, Result};

/// Process specification submitted by a caller
///
/// Exists only for the duration of one request. `args`, `user`, `dir` and
/// `env` default to empty when absent from the message; an empty `user` is
/// rejected when credentials are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Executable path
    pub path: String,

    /// Arguments, not including the program name
    #[serde(default)]
    pub args: Vec<String>,

    /// User to run the process as
    #[serde(default)]
    pub user: String,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Extra environment entries in `KEY=VALUE` form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

impl ProcessSpec {
    /// Create a spec for an executable with no arguments
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the argument list
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the requesting user
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Add one `KEY=VALUE` environment entry
    #[must_use]
    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    /// Check the spec is usable before any resource is allocated
    ///
    /// # Errors
    /// Returns [`Error::Decode`] for an empty path or a malformed env entry
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::Decode {
                message: "process path cannot be empty".to_string(),
            });
        }

        self.env_pairs().map(|_| ())
    }

    /// Split the environment entries into key/value pairs
    ///
    /// # Errors
    /// Returns [`Error::Decode`] if an entry has no `=` or an empty key
    pub fn env_pairs(&self) -> Result<Vec<(&str, &str)>> {
        self.env
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key, value)),
                _ => Err(Error::Decode {
                    message: format!("malformed environment entry '{entry}'"),
                }),
            })
            .collect()
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Numeric identity a process runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    /// User ID
    pub uid: u32,
    /// Group ID
    pub gid: u32,
}

impl Credentials {
    /// Create credentials from raw IDs
    #[must_use]
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Credentials of the current process
    #[must_use]
    pub fn current() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// User record returned by a user lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Login name
    pub name: String,
    /// User ID
    pub uid: u32,
    /// Primary group ID
    pub gid: u32,
}

impl UserRecord {
    /// Create a user record
    #[must_use]
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }

    /// Credentials to run this user's processes with
    #[must_use]
    pub const fn credentials(&self) -> Credentials {
        Credentials::new(self.uid, self.gid)
    }
}

impl From<nix::unistd::User> for UserRecord {
    fn from(user: nix::unistd::User) -> Self {
        Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        }
    }
}

/// Single-byte exit status written to the exit-status pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ExitStatus(u8);

impl ExitStatus {
    /// Sentinel written when the real exit status cannot be determined
    pub const UNKNOWN: Self = Self(255);

    /// Successful exit
    pub const SUCCESS: Self = Self(0);

    /// Create from a raw byte
    #[must_use]
    pub const fn from_raw(code: u8) -> Self {
        Self(code)
    }

    /// Build from a wait status code, keeping the low 8 bits like the kernel does
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub const fn from_code(code: i32) -> Self {
        Self((code & 0xff) as u8)
    }

    /// Status reported for a child killed by a signal
    #[must_use]
    pub const fn from_signal(signal: i32) -> Self {
        Self::from_code(128 + signal)
    }

    /// Get the raw byte
    #[must_use]
    pub const fn as_raw(self) -> u8 {
        self.0
    }

    /// Check if this is the unknown-status sentinel
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        self.0 == Self::UNKNOWN.0
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for ExitStatus {
    fn from(code: u8) -> Self {
        Self(code)
    }
}

impl From<ExitStatus> for u8 {
    fn from(status: ExitStatus) -> Self {
        status.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_spec_builder() {
        let spec = ProcessSpec::new("/bin/echo")
            .with_args(["hi", "there"])
            .with_user("nobody")
            .with_env("LANG=C");

        assert_eq!(spec.path, "/bin/echo");
        assert_eq!(spec.args, vec!["hi", "there"]);
        assert_eq!(spec.user, "nobody");
        assert_eq!(spec.to_string(), "/bin/echo hi there");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_process_spec_validation() {
        assert!(matches!(
            ProcessSpec::new("").validate(),
            Err(Error::Decode { .. })
        ));
        assert!(
            ProcessSpec::new("/bin/true")
                .with_env("NOEQUALS")
                .validate()
                .is_err()
        );
        assert!(
            ProcessSpec::new("/bin/true")
                .with_env("=value")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_env_pairs_keep_equals_in_value() {
        let spec = ProcessSpec::new("/bin/env").with_env("OPTS=a=b");
        assert_eq!(spec.env_pairs().unwrap(), vec![("OPTS", "a=b")]);
    }

    #[test]
    fn test_process_spec_defaults_from_json() {
        let spec: ProcessSpec = serde_json::from_str(r#"{"path":"/bin/ls"}"#).unwrap();
        assert_eq!(spec.path, "/bin/ls");
        assert!(spec.args.is_empty());
        assert!(spec.user.is_empty());
        assert!(spec.dir.is_none());
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(ExitStatus::from_code(0), ExitStatus::SUCCESS);
        assert_eq!(ExitStatus::from_code(256 + 3).as_raw(), 3);
        assert_eq!(ExitStatus::from_signal(9).as_raw(), 137);
        assert!(ExitStatus::UNKNOWN.is_unknown());
        assert!(!ExitStatus::from_raw(1).is_unknown());
    }

    #[test]
    fn test_user_record_credentials() {
        let user = UserRecord::new("nobody", 65534, 65534);
        assert_eq!(user.credentials(), Credentials::new(65534, 65534));
        assert_eq!(user.credentials().to_string(), "65534:65534");
    }
}
