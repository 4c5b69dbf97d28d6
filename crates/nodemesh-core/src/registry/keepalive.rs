//! Periodic lease renewal.

use std::sync::Arc;
use tokio::time::MissedTickBehavior;

use super::MembershipRegistry;
use crate::directory::with_timeout;

impl MembershipRegistry {
    /// Renew the current lease every `keep_alive_interval` until shutdown.
    ///
    /// Failures are logged and retried on the next tick; an unrenewed lease
    /// simply expires in the directory.
    pub(super) fn start_keep_alive_task(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let every = self.settings.keep_alive_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The lease was granted just now.
            ticker.tick().await;

            let mut failures = 0u32;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        failures = registry.renew_once(failures).await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Lease keep-alive task shutting down");
                        break;
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// One bounded renewal attempt; returns the new consecutive failure count.
    async fn renew_once(&self, failures: u32) -> u32 {
        let Some(lease) = self.current_lease() else {
            return failures;
        };

        match with_timeout(
            "keep_alive",
            self.settings.keep_alive_timeout,
            self.directory.keep_alive(lease),
        )
        .await
        {
            Ok(ttl) => {
                if failures > 0 {
                    tracing::info!(lease = %lease, after_failures = failures, "💓 Lease renewal recovered");
                } else {
                    tracing::trace!(lease = %lease, ttl_secs = ttl.as_secs(), "Lease renewed");
                }
                0
            },
            Err(e) if e.is_connection_failure() => {
                let failures = failures.saturating_add(1);
                tracing::warn!(
                    lease = %lease,
                    consecutive_failures = failures,
                    error = %e,
                    "Lease renewal failed"
                );
                failures
            },
            Err(e) => {
                // The directory answered; the lease itself is gone.
                let failures = failures.saturating_add(1);
                tracing::error!(
                    lease = %lease,
                    consecutive_failures = failures,
                    error = %e,
                    "💔 Lease can no longer be renewed"
                );
                failures
            },
        }
    }
}
