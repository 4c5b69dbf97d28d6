//! # Nodemesh Core
//!
//! Cluster membership and session routing for one mesh node.
//!
//! ## Architecture
//!
//! ```text
//! nodemesh-core/src/
//! ├── directory/     # Directory trait, MemoryDirectory, EtcdDirectory (feature `etcd`)
//! ├── connection.rs  # ConnectionManager trait + PeerTable
//! ├── registry/      # Own record, lease, keep-alive, self-loss policy
//! ├── mirror/        # Watch-driven membership mirror
//! ├── synchronizer.rs# Membership deltas -> peer connections
//! ├── router/        # Least-loaded selection, assignments, client counts
//! └── node.rs        # MeshNode: wires everything together
//! ```
//!
//! Data flow: the registry registers and starts the mirror for every watched
//! prefix; mirror events drive the synchronizer; the router reads the mirror
//! and writes assignment and load records straight to the directory.

#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::indexing_slicing,
        reason = "Test code"
    )
)]

pub mod connection;
pub mod directory;
pub mod mirror;
pub mod node;
pub mod registry;
pub mod router;
pub mod synchronizer;

pub use connection::{ConnectionManager, PeerConnection, PeerTable};
#[cfg(feature = "etcd")]
pub use directory::EtcdDirectory;
pub use directory::{Directory, KeyValue, MemoryDirectory, PrefixSnapshot, WatchEvent, WatchEventKind};
pub use mirror::{ClusterMirror, MirrorAlert, PrefixMap};
pub use node::MeshNode;
pub use registry::{LocalNode, MembershipRegistry, RegistrySettings};
pub use router::SessionRouter;
pub use synchronizer::ConnectionSynchronizer;
