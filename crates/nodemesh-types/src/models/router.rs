//! Typed request and response structures for session router operations.
//!
//! The surrounding RPC layer builds these from its own wire format and calls
//! `validate()` before handing them to the router.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::RouterError;
use crate::models::node::KEY_SEPARATOR;

fn validate_segment(field: &str, value: &str) -> Result<(), RouterError> {
    if value.trim().is_empty() {
        return Err(RouterError::invalid(field, "must not be empty"));
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(RouterError::invalid(field, format!("must not contain '{KEY_SEPARATOR}'")));
    }
    Ok(())
}

fn validate_key(field: &str, value: &str) -> Result<(), RouterError> {
    if value.trim().is_empty() {
        return Err(RouterError::invalid(field, "must not be empty"));
    }
    Ok(())
}

fn validate_timeout(timeout_ms: Option<u64>) -> Result<(), RouterError> {
    if timeout_ms == Some(0) {
        return Err(RouterError::invalid("timeout_ms", "must be greater than zero"));
    }
    Ok(())
}

fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

/// Ask for the best server of a type, optionally reusing a prior assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectServerRequest {
    pub server_type: String,
    /// Directory key of the caller's assignment record
    #[serde(default)]
    pub assignment_key: Option<String>,
    /// Deadline for directory round-trips; the router default applies when unset
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl SelectServerRequest {
    pub fn new(server_type: impl Into<String>) -> Self {
        Self { server_type: server_type.into(), assignment_key: None, timeout_ms: None }
    }

    pub fn with_assignment_key(mut self, key: impl Into<String>) -> Self {
        self.assignment_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(millis(timeout));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        validate_segment("server_type", &self.server_type)?;
        if let Some(key) = &self.assignment_key {
            validate_key("assignment_key", key)?;
        }
        validate_timeout(self.timeout_ms)
    }
}

/// Server chosen for a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectServerResponse {
    pub server_name: String,
    /// Client-facing address of the chosen server
    pub client_addr: String,
    /// True when a still-valid prior assignment was returned unchanged
    pub reused: bool,
}

/// Report the live client count of a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateClientCountRequest {
    pub server_type: String,
    pub server_name: String,
    pub count: u32,
    /// Deadline for the write-back; the router default applies when unset
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl UpdateClientCountRequest {
    pub fn new(server_type: impl Into<String>, server_name: impl Into<String>, count: u32) -> Self {
        Self {
            server_type: server_type.into(),
            server_name: server_name.into(),
            count,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(millis(timeout));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        validate_segment("server_type", &self.server_type)?;
        validate_segment("server_name", &self.server_name)?;
        validate_timeout(self.timeout_ms)
    }
}

/// Drop a batch of assignment records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeleteAssignmentsRequest {
    pub keys: Vec<String>,
    /// Deadline applied to each delete
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl DeleteAssignmentsRequest {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { keys: keys.into_iter().map(Into::into).collect(), timeout_ms: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(millis(timeout));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        for key in &self.keys {
            validate_key("keys", key)?;
        }
        validate_timeout(self.timeout_ms)
    }
}
