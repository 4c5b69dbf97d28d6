//! Typed error definitions for nodemesh.
//!
//! This module provides a structured error hierarchy with one error type per
//! component. All errors are designed to be:
//!
//! - **Serializable** for API responses via serde
//! - **Displayable** for logging via Display trait
//! - **Matchable** for error handling logic via enum variants
//! - **Composable** via thiserror derive macros

mod config;
mod directory;
mod registry;
mod router;

pub use config::ConfigError;
pub use directory::DirectoryError;
pub use registry::RegistryError;
pub use router::RouterError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type that wraps all domain-specific errors.
///
/// Use this when you need a single error type that can represent
/// any nodemesh error.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "domain", content = "error")]
pub enum TypedError {
    /// Wraps a directory client error
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Wraps a membership registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Wraps a session router error
    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    /// Wraps a configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Standard Result type using TypedError.
pub type Result<T> = std::result::Result<T, TypedError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = TypedError::Router(RouterError::NoAvailableServer {
            server_type: "chatServer".to_string(),
        });

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Router"));
        assert!(json.contains("chatServer"));

        let deserialized: TypedError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, deserialized);
    }

    #[test]
    fn test_error_display() {
        let err = RouterError::NoAvailableServer { server_type: "chatServer".to_string() };
        assert_eq!(err.to_string(), "No available server of type chatServer");

        let err = TypedError::from(DirectoryError::LeaseNotFound { lease: 7 });
        let msg = format!("{}", err);
        assert!(msg.contains("Lease 7 not found"));
    }

    #[test]
    fn test_connection_failure_classification() {
        assert!(DirectoryError::Closed.is_connection_failure());
        assert!(DirectoryError::Unavailable { message: "refused".into() }.is_connection_failure());
        assert!(!DirectoryError::LeaseNotFound { lease: 3 }.is_connection_failure());

        let mismatch =
            DirectoryError::LeaseMismatch { key: "chatServer/chat-1".into(), expected: 1, actual: Some(2) };
        assert!(!mismatch.is_connection_failure());
        assert_eq!(mismatch.to_string(), "Key chatServer/chat-1 is no longer held by lease 1");
    }
}
