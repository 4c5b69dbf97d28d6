//! Membership registry errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::DirectoryError;

/// Errors raised while registering this node. All of them abort startup.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum RegistryError {
    /// Could not establish a session with the directory
    #[error("Failed to connect to directory: {0}")]
    Connect(DirectoryError),

    /// The initial registration write was rejected
    #[error("Registration of {key} failed: {source}")]
    RegistrationFailed {
        /// Directory key of this node's record
        key: String,
        /// Underlying directory failure
        source: DirectoryError,
    },

    /// Seeding or subscribing a watched prefix failed
    #[error("Watching prefix {prefix} failed: {source}")]
    WatchFailed {
        /// Prefix that could not be mirrored
        prefix: String,
        /// Underlying directory failure
        source: DirectoryError,
    },

    /// `register` was called on a registry that already holds a lease
    #[error("Node {key} is already registered")]
    AlreadyRegistered {
        /// Directory key of this node's record
        key: String,
    },

    /// Any other directory failure
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
