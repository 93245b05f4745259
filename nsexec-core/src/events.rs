//! Process lifecycle events with structured tracing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::{Credentials, ExitStatus};

/// Events emitted while a request is handled
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessEvent {
    /// Process started
    Started {
        /// Executable path
        path: String,
        /// Child PID, if the runner knows it
        pid: Option<u32>,
        /// Credentials the process runs with
        credentials: Credentials,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Exit status written to the caller
    Exited {
        /// Executable path
        path: String,
        /// Reported status
        status: ExitStatus,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Completion could not be reported cleanly
    ReportFailed {
        /// Executable path
        path: String,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Request refused before a process was started
    Rejected {
        /// Executable path, empty if the request never decoded
        path: String,
        /// Error class
        kind: String,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },
}

impl ProcessEvent {
    /// Get the executable path from any event
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Started { path, .. }
            | Self::Exited { path, .. }
            | Self::ReportFailed { path, .. }
            | Self::Rejected { path, .. } => path,
        }
    }

    /// Get the timestamp from any event
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        match self {
            Self::Started { timestamp, .. }
            | Self::Exited { timestamp, .. }
            | Self::ReportFailed { timestamp, .. }
            | Self::Rejected { timestamp, .. } => *timestamp,
        }
    }

    /// Check if this is a critical event
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::ReportFailed { .. })
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::Started {
                path,
                pid,
                credentials,
                ..
            } => {
                tracing::info!(
                    path = %path,
                    pid = ?pid,
                    uid = credentials.uid,
                    gid = credentials.gid,
                    event = "started",
                    "Process started"
                );
            }
            Self::Exited { path, status, .. } => {
                tracing::info!(
                    path = %path,
                    exit_status = status.as_raw(),
                    event = "exited",
                    "Process exited"
                );
            }
            Self::ReportFailed { path, message, .. } => {
                tracing::error!(
                    path = %path,
                    message = %message,
                    event = "report_failed",
                    "Failed to report process completion"
                );
            }
            Self::Rejected {
                path,
                kind,
                message,
                ..
            } => {
                tracing::warn!(
                    path = %path,
                    kind = %kind,
                    message = %message,
                    event = "rejected",
                    "Request rejected"
                );
            }
        }
    }
}

impl fmt::Display for ProcessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started {
                path, credentials, ..
            } => write!(f, "Process {path} started as {credentials}"),
            Self::Exited { path, status, .. } => {
                write!(f, "Process {path} exited with status {status}")
            }
            Self::ReportFailed { path, message, .. } => {
                write!(f, "Process {path} report failed: {message}")
            }
            Self::Rejected {
                path,
                kind,
                message,
                ..
            } => write!(f, "Request for {path} rejected ({kind}): {message}"),
        }
    }
}

// Custom SystemTime serialization
mod systemtime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(since_epoch.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_path() {
        let event = ProcessEvent::Exited {
            path: "/bin/echo".to_string(),
            status: ExitStatus::SUCCESS,
            timestamp: SystemTime::now(),
        };

        assert_eq!(event.path(), "/bin/echo");
        assert_eq!(event.to_string(), "Process /bin/echo exited with status 0");
    }

    #[test]
    fn test_event_critical() {
        let event = ProcessEvent::ReportFailed {
            path: "/bin/echo".to_string(),
            message: "broken pipe".to_string(),
            timestamp: SystemTime::now(),
        };
        assert!(event.is_critical());

        let event = ProcessEvent::Started {
            path: "/bin/echo".to_string(),
            pid: Some(42),
            credentials: Credentials::new(65534, 65534),
            timestamp: SystemTime::now(),
        };
        assert!(!event.is_critical());
    }

    #[test]
    fn test_event_serde_tag() {
        let event = ProcessEvent::Rejected {
            path: "/bin/echo".to_string(),
            kind: "credential".to_string(),
            message: "unknown user".to_string(),
            timestamp: SystemTime::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"rejected""#));

        let deserialized: ProcessEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.path(), "/bin/echo");
    }

    #[test]
    fn test_event_timestamp_whole_seconds() {
        let at = std::time::UNIX_EPOCH + std::time::Duration::from_millis(1_700_000_000_250);
        let event = ProcessEvent::Exited {
            path: "/bin/true".to_string(),
            status: ExitStatus::SUCCESS,
            timestamp: at,
        };
        assert_eq!(event.timestamp(), at);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""timestamp":1700000000"#));

        let back: ProcessEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.timestamp(),
            std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000)
        );
    }
}
