//! Directory client errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a directory client.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum DirectoryError {
    /// The directory could not be reached
    #[error("Directory unavailable: {message}")]
    Unavailable {
        /// Description of the connection failure
        message: String,
    },

    /// The lease was revoked or has expired
    #[error("Lease {lease} not found")]
    LeaseNotFound {
        /// Raw lease identifier
        lease: i64,
    },

    /// A directory call did not complete in time
    #[error("Directory {operation} timed out after {after_ms}ms")]
    Timeout {
        /// Operation that timed out (get, put, keep_alive, ...)
        operation: String,
        /// Deadline that elapsed
        after_ms: u64,
    },

    /// A lease-scoped write found the key missing or attached to another lease
    #[error("Key {key} is no longer held by lease {expected}")]
    LeaseMismatch {
        /// Directory key of the conditional write
        key: String,
        /// Lease the writer expected to hold the key
        expected: i64,
        /// Lease currently holding the key, if the key still exists
        actual: Option<i64>,
    },

    /// The watch subscriber fell behind and events were dropped
    #[error("Watch fell behind, {skipped} events dropped")]
    WatchLagged {
        /// Number of events the subscriber missed
        skipped: u64,
    },

    /// The requested start revision has already been discarded
    #[error("Revision {requested} compacted, oldest retained is {oldest}")]
    Compacted {
        /// Revision the caller asked for
        requested: u64,
        /// Oldest revision still available
        oldest: u64,
    },

    /// The client has been closed
    #[error("Directory client closed")]
    Closed,

    /// A value could not be encoded or decoded
    #[error("Codec error for {key}: {message}")]
    Codec {
        /// Directory key of the offending value
        key: String,
        /// Description of the codec failure
        message: String,
    },
}

impl DirectoryError {
    /// Build a codec error from a serde_json failure.
    pub fn codec(key: &str, e: &serde_json::Error) -> Self {
        Self::Codec { key: key.to_string(), message: e.to_string() }
    }

    /// Build a timeout error for the named operation.
    pub fn timeout(operation: &str, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// True when the error means the directory itself is unreachable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Closed | Self::Timeout { .. })
    }
}
