//! # Nodemesh Types
//!
//! Core types, models, and error definitions for nodemesh.
//!
//! This crate provides the foundational type system shared by every member
//! of the workspace:
//!
//! - **`error`** - Typed error hierarchy for the directory, registry, router, and configuration
//! - **`models`** - Node records, routing tables, router requests, node configuration
//!
//! ## Architecture Role
//!
//! `nodemesh-types` sits at the bottom of the dependency graph:
//!
//! ```text
//!                nodemesh-types (this crate)
//!                        │
//!                        ▼
//!                  nodemesh-core
//!          (registry, mirror, synchronizer, router)
//!                        │
//!                        ▼
//!                 nodemesh-server
//! ```
//!
//! All types are designed to be:
//! - **Serializable** via serde for directory values and the HTTP API
//! - **Clone** for cheap sharing across async boundaries
//! - **PartialEq** for testing and comparison

pub mod error;
pub mod models;

// Re-export error types for convenience
pub use error::{ConfigError, DirectoryError, RegistryError, Result, RouterError, TypedError};

// Re-export core model types
pub use models::{
    config_key, new_incarnation_id, DeleteAssignmentsRequest, LeaseId, NodeConfig, NodeDescriptor, NodeKey,
    NodeRecord, PeerSelector, RoutingAction, RoutingRule, RoutingTable, SelectServerRequest,
    SelectServerResponse, SelfLossPolicy, UpdateClientCountRequest, CONFIG_PREFIX,
    KEY_SEPARATOR,
};
