//! Session router: least-loaded server selection over the mirror, with
//! idempotent re-assignment and client-count write-back.
//!
//! Reads come from the [`ClusterMirror`]; assignment records and client counts
//! are written to the directory. Every directory round-trip on the request
//! path runs under the request's deadline (or the router default).

mod selection;

use nodemesh_types::{
    DeleteAssignmentsRequest, DirectoryError, NodeKey, NodeRecord, RouterError,
    SelectServerRequest, SelectServerResponse, UpdateClientCountRequest,
};
use std::sync::Arc;
use std::time::Duration;

use crate::directory::{with_timeout, Directory};
use crate::mirror::ClusterMirror;
pub use selection::least_loaded;

fn router_error(e: DirectoryError) -> RouterError {
    match e {
        DirectoryError::Timeout { operation, after_ms } => RouterError::Timeout { operation, after_ms },
        other => RouterError::Directory(other),
    }
}

fn response(record: &NodeRecord, reused: bool) -> SelectServerResponse {
    SelectServerResponse {
        server_name: record.name.clone(),
        client_addr: record.ws_addr.clone(),
        reused,
    }
}

pub struct SessionRouter {
    directory: Arc<dyn Directory>,
    mirror: Arc<ClusterMirror>,
    request_timeout: Duration,
}

impl SessionRouter {
    pub fn new(
        directory: Arc<dyn Directory>,
        mirror: Arc<ClusterMirror>,
        request_timeout: Duration,
    ) -> Self {
        Self { directory, mirror, request_timeout }
    }

    pub fn mirror(&self) -> &Arc<ClusterMirror> {
        &self.mirror
    }

    /// Best server of the requested type, reusing a prior assignment when it is still valid.
    pub async fn select_server(
        &self,
        request: &SelectServerRequest,
    ) -> Result<SelectServerResponse, RouterError> {
        request.validate()?;
        let deadline = request.timeout().unwrap_or(self.request_timeout);

        if let Some(key) = &request.assignment_key {
            if let Some(previous) = self.reuse_assignment(key, &request.server_type, deadline).await {
                tracing::debug!(key = %key, server = %previous.server_name, "Reusing prior assignment");
                return Ok(previous);
            }
        }

        let record = self.pick(&request.server_type)?;

        if let Some(key) = &request.assignment_key {
            let value = record.encode().map_err(|e| DirectoryError::codec(key, &e))?;
            with_timeout("put", deadline, self.directory.put(key, value))
                .await
                .map_err(router_error)?;
        }

        tracing::debug!(
            server_type = %request.server_type,
            server = %record.name,
            client_count = record.client_count,
            "Selected server"
        );
        Ok(response(&record, false))
    }

    /// Least-loaded eligible record from the mirror, chosen under the mirror lock.
    fn pick(&self, server_type: &str) -> Result<NodeRecord, RouterError> {
        let picked = self.mirror.with_prefix(server_type, |records| {
            records.and_then(|records| least_loaded(records.values())).cloned()
        });
        picked.ok_or_else(|| {
            tracing::debug!(server_type = %server_type, "No eligible server");
            RouterError::NoAvailableServer { server_type: server_type.to_string() }
        })
    }

    /// Prior assignment at `key` if its server still runs the same incarnation.
    ///
    /// Any failure here only means "no reusable assignment".
    async fn reuse_assignment(
        &self,
        key: &str,
        server_type: &str,
        deadline: Duration,
    ) -> Option<SelectServerResponse> {
        let assigned = match with_timeout("get", deadline, self.directory.get(key)).await {
            Ok(Some(kv)) => match NodeRecord::decode(&kv.value) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Unreadable assignment record");
                    return None;
                },
            },
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read assignment record");
                return None;
            },
        };

        if assigned.node_type != server_type {
            tracing::debug!(
                key = %key,
                assigned_type = %assigned.node_type,
                requested_type = %server_type,
                "Assignment is for another server type"
            );
            return None;
        }

        let server_key = assigned.directory_key();
        let current = match with_timeout("get", deadline, self.directory.get(&server_key)).await {
            Ok(Some(kv)) => match NodeRecord::decode(&kv.value) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(key = %server_key, error = %e, "Unreadable server record");
                    return None;
                },
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %server_key, error = %e, "Failed to read server record");
                return None;
            },
        };

        if current.as_ref().is_some_and(|current| current.same_incarnation(&assigned)) {
            return Some(response(&assigned, true));
        }

        tracing::info!(key = %key, server = %assigned.name, "♻️ Discarding stale assignment");
        if let Err(e) = with_timeout("delete", deadline, self.directory.delete(key)).await {
            tracing::warn!(key = %key, error = %e, "Failed to delete stale assignment");
        }
        None
    }

    /// Record a server's live client count and write it back under that server's lease.
    ///
    /// The write only lands while the key is still held by the lease the mirror
    /// saw, so a superseded registration is never overwritten. Unknown servers
    /// are ignored. Write-back failures are logged, not returned.
    pub async fn update_client_count(
        &self,
        request: &UpdateClientCountRequest,
    ) -> Result<(), RouterError> {
        request.validate()?;
        let node = NodeKey::new(request.server_type.as_str(), request.server_name.as_str());

        let Some((record, lease)) = self.mirror.set_client_count(&node, request.count) else {
            tracing::debug!(server = %node, "Client count for unmirrored server ignored");
            return Ok(());
        };
        let Some(lease) = lease else {
            tracing::warn!(server = %node, "No lease known for server, skipping write-back");
            return Ok(());
        };

        let key = node.directory_key();
        let value = match record.encode() {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(server = %node, error = %e, "Failed to encode node record");
                return Ok(());
            },
        };
        let deadline = request.timeout().unwrap_or(self.request_timeout);
        match with_timeout("put_if_lease", deadline, self.directory.put_if_lease(&key, value, lease))
            .await
        {
            Ok(()) => tracing::trace!(server = %node, count = request.count, "Client count written"),
            Err(DirectoryError::LeaseMismatch { actual, .. }) => {
                tracing::debug!(
                    server = %node,
                    lease = %lease,
                    holder = ?actual,
                    "Server re-registered under another lease, client count not written"
                );
            },
            Err(e) => {
                tracing::warn!(server = %node, lease = %lease, error = %e, "Client count write-back failed");
            },
        }
        Ok(())
    }

    /// Best-effort delete of assignment records; returns how many existed.
    pub async fn delete_assignments(
        &self,
        request: &DeleteAssignmentsRequest,
    ) -> Result<usize, RouterError> {
        request.validate()?;
        let deadline = request.timeout().unwrap_or(self.request_timeout);
        let mut removed = 0;
        for key in &request.keys {
            match with_timeout("delete", deadline, self.directory.delete(key)).await {
                Ok(true) => removed += 1,
                Ok(false) => {},
                Err(e) => tracing::warn!(key = %key, error = %e, "Failed to delete assignment"),
            }
        }
        Ok(removed)
    }
}
