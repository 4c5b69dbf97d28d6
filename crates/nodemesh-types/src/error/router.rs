//! Session router errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::DirectoryError;

/// Errors returned from session router operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum RouterError {
    /// Every mirrored server of this type is full, or none is registered
    #[error("No available server of type {server_type}")]
    NoAvailableServer { server_type: String },

    /// Request failed boundary validation
    #[error("Invalid request field {field}: {message}")]
    InvalidRequest { field: String, message: String },

    /// The directory rejected or failed a write on the request path
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// The caller-supplied deadline elapsed
    #[error("Router {operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },
}

impl RouterError {
    /// Build a validation error for the named field.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidRequest { field: field.to_string(), message: message.into() }
    }

    /// Expected business outcome rather than a system fault.
    pub fn is_business_error(&self) -> bool {
        matches!(self, Self::NoAvailableServer { .. })
    }

    /// Check if this is a client error (4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. })
    }
}
