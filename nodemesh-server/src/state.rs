//! Application State
//!
//! Shared handles for the HTTP handlers: the running mesh node and its peer table.

use std::sync::Arc;
use std::time::Instant;

use nodemesh_core::{ClusterMirror, MeshNode, MembershipRegistry, PeerTable, SessionRouter};
use nodemesh_types::NodeConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub(crate) inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub node: MeshNode,
    pub peers: Arc<PeerTable>,
    pub config: NodeConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(node: MeshNode, peers: Arc<PeerTable>, config: NodeConfig) -> Self {
        Self { inner: Arc::new(AppStateInner { node, peers, config, started_at: Instant::now() }) }
    }

    pub fn node(&self) -> &MeshNode {
        &self.inner.node
    }

    pub fn router(&self) -> &SessionRouter {
        self.inner.node.router()
    }

    pub fn mirror(&self) -> &ClusterMirror {
        self.inner.node.mirror()
    }

    pub fn registry(&self) -> &MembershipRegistry {
        self.inner.node.registry()
    }

    pub fn peers(&self) -> &PeerTable {
        &self.inner.peers
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }
}
