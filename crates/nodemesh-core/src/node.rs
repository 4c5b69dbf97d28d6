//! Wiring of one mesh node.

use nodemesh_types::{NodeConfig, RegistryError};
use std::sync::Arc;

use crate::connection::ConnectionManager;
use crate::directory::Directory;
use crate::mirror::{ClusterMirror, MirrorAlert};
use crate::registry::{LocalNode, MembershipRegistry, RegistrySettings};
use crate::router::SessionRouter;
use crate::synchronizer::ConnectionSynchronizer;

/// A registered node: registry, mirror and router over one directory.
pub struct MeshNode {
    registry: Arc<MembershipRegistry>,
    mirror: Arc<ClusterMirror>,
    router: Arc<SessionRouter>,
}

impl MeshNode {
    /// Build every component and register. A failed registration releases
    /// whatever was acquired before returning the error.
    pub async fn start(
        config: &NodeConfig,
        directory: Arc<dyn Directory>,
        connections: Arc<dyn ConnectionManager>,
    ) -> Result<Self, RegistryError> {
        let local = LocalNode::new(config.node.clone());
        let synchronizer = Arc::new(ConnectionSynchronizer::new(
            config.node.node_type.as_str(),
            config.node.name.as_str(),
            config.routing_table.clone(),
            connections,
        ));
        let mirror = ClusterMirror::new(Arc::clone(&directory), synchronizer, local.key());
        let router = Arc::new(SessionRouter::new(
            Arc::clone(&directory),
            Arc::clone(&mirror),
            config.request_timeout(),
        ));
        let registry = MembershipRegistry::new(
            directory,
            Arc::clone(&mirror),
            local,
            RegistrySettings::from(config),
        );

        if let Err(e) = registry.register().await {
            // WatchFailed already released everything inside register().
            if !matches!(e, RegistryError::WatchFailed { .. }) {
                if let Err(cleanup) = registry.deregister().await {
                    tracing::warn!(error = %cleanup, "Cleanup after failed start incomplete");
                }
            }
            return Err(e);
        }
        Ok(Self { registry, mirror, router })
    }

    pub fn registry(&self) -> &Arc<MembershipRegistry> {
        &self.registry
    }

    pub fn mirror(&self) -> &Arc<ClusterMirror> {
        &self.mirror
    }

    pub fn router(&self) -> &Arc<SessionRouter> {
        &self.router
    }

    pub fn subscribe_alerts(&self) -> tokio::sync::broadcast::Receiver<MirrorAlert> {
        self.mirror.subscribe_alerts()
    }

    /// Stop watching, revoke the lease and close the directory.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        tracing::info!(key = %self.registry.local().key(), "🛑 Shutting down mesh node");
        self.registry.deregister().await
    }
}
