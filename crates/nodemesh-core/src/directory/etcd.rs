//! [`Directory`] backed by an etcd cluster.
//!
//! Leases, revisions and watches map one to one onto etcd's. The
//! lease-conditional write is a single transaction comparing the key's lease.

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, EventType, GetOptions, PutOptions, Txn, TxnOp,
    WatchOptions,
};
use nodemesh_types::{DirectoryError, LeaseId};
use std::time::Duration;
use tokio::sync::watch;

use super::{Directory, KeyValue, PrefixSnapshot, WatchEvent, WatchStream};

fn unavailable(e: &etcd_client::Error) -> DirectoryError {
    DirectoryError::Unavailable { message: e.to_string() }
}

/// Lease RPCs report a missing lease as a gRPC error with this text.
fn lease_error(lease: LeaseId, e: &etcd_client::Error) -> DirectoryError {
    if e.to_string().contains("requested lease not found") {
        DirectoryError::LeaseNotFound { lease: lease.0 }
    } else {
        unavailable(e)
    }
}

fn revision(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

/// etcd uses lease 0 for "no lease".
fn lease_of(raw: i64) -> Option<LeaseId> {
    (raw != 0).then_some(LeaseId(raw))
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX)
}

fn key_value(kv: &etcd_client::KeyValue) -> Option<KeyValue> {
    let key = match kv.key_str() {
        Ok(key) => key.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping non UTF-8 directory key");
            return None;
        },
    };
    Some(KeyValue {
        key,
        value: kv.value().to_vec(),
        lease: lease_of(kv.lease()),
        mod_revision: revision(kv.mod_revision()),
    })
}

fn watch_event(event: &etcd_client::Event) -> Option<WatchEvent> {
    let kv = key_value(event.kv()?)?;
    Some(match event.event_type() {
        EventType::Put => WatchEvent::put(kv.key, kv.value, kv.lease, kv.mod_revision),
        EventType::Delete => WatchEvent::delete(kv.key, kv.mod_revision),
    })
}

pub struct EtcdDirectory {
    client: Client,
    shutdown_tx: watch::Sender<bool>,
}

impl EtcdDirectory {
    /// Connect to the first reachable endpoint.
    pub async fn connect(endpoints: &[String], timeout: Duration) -> Result<Self, DirectoryError> {
        let options = ConnectOptions::new().with_connect_timeout(timeout).with_timeout(timeout);
        let client = Client::connect(endpoints, Some(options)).await.map_err(|e| unavailable(&e))?;
        let (shutdown_tx, _) = watch::channel(false);
        tracing::info!(endpoints = ?endpoints, "🔗 Connected to etcd");
        Ok(Self { client, shutdown_tx })
    }

    /// Client handle for one call; `Closed` after [`Directory::close`].
    fn client(&self) -> Result<Client, DirectoryError> {
        if *self.shutdown_tx.borrow() {
            return Err(DirectoryError::Closed);
        }
        Ok(self.client.clone())
    }
}

#[async_trait]
impl Directory for EtcdDirectory {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, DirectoryError> {
        let response = self.client()?.get(key, None).await.map_err(|e| unavailable(&e))?;
        Ok(response.kvs().first().and_then(key_value))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<PrefixSnapshot, DirectoryError> {
        let response = self
            .client()?
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| unavailable(&e))?;
        let revision = response.header().map_or(0, |header| revision(header.revision()));
        let kvs = response.kvs().iter().filter_map(key_value).collect();
        Ok(PrefixSnapshot { revision, kvs })
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), DirectoryError> {
        self.client()?.put(key, value, None).await.map_err(|e| unavailable(&e))?;
        Ok(())
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> Result<(), DirectoryError> {
        self.client()?
            .put(key, value, Some(PutOptions::new().with_lease(lease.0)))
            .await
            .map_err(|e| lease_error(lease, &e))?;
        Ok(())
    }

    async fn put_if_lease(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> Result<(), DirectoryError> {
        let mut client = self.client()?;
        let txn = Txn::new()
            .when(vec![Compare::lease(key, CompareOp::Equal, lease.0)])
            .and_then(vec![TxnOp::put(key, value, Some(PutOptions::new().with_lease(lease.0)))]);
        let response = client.txn(txn).await.map_err(|e| lease_error(lease, &e))?;
        if response.succeeded() {
            return Ok(());
        }

        let actual = client
            .get(key, None)
            .await
            .map_err(|e| unavailable(&e))?
            .kvs()
            .first()
            .and_then(|kv| lease_of(kv.lease()))
            .map(|id| id.0);
        Err(DirectoryError::LeaseMismatch { key: key.to_string(), expected: lease.0, actual })
    }

    async fn delete(&self, key: &str) -> Result<bool, DirectoryError> {
        let response = self.client()?.delete(key, None).await.map_err(|e| unavailable(&e))?;
        Ok(response.deleted() > 0)
    }

    async fn watch(&self, prefix: &str, start_revision: u64) -> Result<WatchStream, DirectoryError> {
        let start = i64::try_from(start_revision.max(1)).unwrap_or(i64::MAX);
        let options = WatchOptions::new().with_prefix().with_start_revision(start);
        let (watcher, mut events) =
            self.client()?.watch(prefix, Some(options)).await.map_err(|e| unavailable(&e))?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let prefix = prefix.to_string();

        let stream = async_stream::stream! {
            // Dropping the watcher cancels the watch.
            let _watcher = watcher;
            loop {
                let message = tokio::select! {
                    message = events.message() => message,
                    _ = shutdown_rx.changed() => break,
                };
                match message {
                    Ok(Some(response)) => {
                        if response.compact_revision() > 0 {
                            yield Err(DirectoryError::Compacted {
                                requested: revision(start),
                                oldest: revision(response.compact_revision()),
                            });
                            break;
                        }
                        if response.canceled() {
                            yield Err(DirectoryError::Unavailable {
                                message: format!("watch on {prefix} canceled"),
                            });
                            break;
                        }
                        for event in response.events().iter().filter_map(watch_event) {
                            yield Ok(event);
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(unavailable(&e));
                        break;
                    },
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, DirectoryError> {
        let response =
            self.client()?.lease_grant(ttl_secs(ttl), None).await.map_err(|e| unavailable(&e))?;
        Ok(LeaseId(response.id()))
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<Duration, DirectoryError> {
        let (mut keeper, mut responses) =
            self.client()?.lease_keep_alive(lease.0).await.map_err(|e| lease_error(lease, &e))?;
        keeper.keep_alive().await.map_err(|e| lease_error(lease, &e))?;

        match responses.message().await.map_err(|e| lease_error(lease, &e))? {
            // A zero TTL means the lease has already expired.
            Some(response) if response.ttl() > 0 => {
                Ok(Duration::from_secs(u64::try_from(response.ttl()).unwrap_or(0)))
            },
            Some(_) => Err(DirectoryError::LeaseNotFound { lease: lease.0 }),
            None => Err(DirectoryError::Unavailable {
                message: format!("keep-alive stream for lease {lease} closed"),
            }),
        }
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), DirectoryError> {
        self.client()?.lease_revoke(lease.0).await.map_err(|e| lease_error(lease, &e))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DirectoryError> {
        self.shutdown_tx.send_replace(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_value_conversions() {
        assert_eq!(lease_of(0), None);
        assert_eq!(lease_of(42), Some(LeaseId(42)));
        assert_eq!(revision(-1), 0);
        assert_eq!(revision(17), 17);
        assert_eq!(ttl_secs(Duration::from_millis(300)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(45)), 45);
    }
}
