use crate::{
    core::Reloader,
    index::{self, Settings, SharedIndex},
    metrics::ReconcileMetrics,
    queue::WorkQueue,
    status::{self, StatusManager, StatusWriter},
};
use tokio::time::{self, Duration, Instant};
use tracing::{info_span, Instrument};

/// The key queued by the periodic resync.
pub const RESYNC_KEY: &str = "resync";

const CLEANUP_ATTEMPTS: u32 = 5;
const CLEANUP_BACKOFF: Duration = Duration::from_secs(1);

/// Rebuilds the proxy configuration and publishes this controller's addresses.
pub struct Reconciler<R, W> {
    index: SharedIndex,
    settings: Settings,
    reloader: R,
    status: StatusManager<W>,
    metrics: ReconcileMetrics,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to build configuration: {0}")]
    Config(#[from] index::Error),

    #[error("failed to reload proxy: {0:#}")]
    Reload(anyhow::Error),

    #[error("failed to update ingress status: {0}")]
    Status(#[from] status::Error),
}

// === impl Reconciler ===

impl<R, W> Reconciler<R, W>
where
    R: Reloader,
    W: StatusWriter,
{
    pub fn new(
        index: SharedIndex,
        settings: Settings,
        reloader: R,
        status: StatusManager<W>,
        metrics: ReconcileMetrics,
    ) -> Self {
        Self {
            index,
            settings,
            reloader,
            status,
            metrics,
        }
    }

    /// Rebuilds the configuration from the index, applies it, and reconciles
    /// ingress status.
    ///
    /// Every key triggers the same full rebuild; the key only identifies the
    /// change that caused it.
    pub async fn sync(&self, key: &str) -> Result<(), SyncError> {
        tracing::debug!(%key, "Syncing");

        // The lock is released before any I/O so watches are never blocked on a reload.
        let config = self.index.read().build_config(&self.settings)?;

        if self
            .reloader
            .check_and_reload(&config)
            .await
            .map_err(SyncError::Reload)?
        {
            self.metrics.reloaded();
        }

        let addrs = self.status.load_balancer_ingress()?;
        let updated = self.status.update_ingress_status(&addrs).await?;
        self.metrics.status_updated(updated);
        Ok(())
    }

    /// Processes queued keys, one at a time, until shutdown is signaled.
    ///
    /// A sync in progress when shutdown is signaled runs to completion. This
    /// controller's addresses are then removed from ingress status before the
    /// shutdown is released.
    pub async fn run(self, queue: WorkQueue, shutdown: drain::Watch) {
        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);

        let release = loop {
            let key = tokio::select! {
                biased;
                release = &mut shutdown => break release,
                key = queue.next() => key,
            };
            match key {
                Some(key) => self.process(&queue, key).await,
                None => break (&mut shutdown).await,
            }
        };

        tracing::info!("Shutting down");
        queue.shut_down();
        self.remove_addresses().await;
        drop(release);
    }

    async fn process(&self, queue: &WorkQueue, key: String) {
        let start = Instant::now();
        let result = self
            .sync(&key)
            .instrument(info_span!("sync", %key))
            .await;
        self.metrics.sync(result.is_ok(), start.elapsed());

        match result {
            Ok(()) => queue.forget(&key),
            Err(error) => {
                let delay = queue.backoff(&key);
                tracing::warn!(%key, %error, ?delay, "Sync failed; requeueing");
                queue.requeue_after(key, delay);
            }
        }
    }

    async fn remove_addresses(&self) {
        for attempt in 1..=CLEANUP_ATTEMPTS {
            match self.status.remove_address_from_load_balancer_ingress().await {
                Ok(updated) => {
                    tracing::info!(updated, "Removed address from ingress status");
                    return;
                }
                Err(error) => {
                    tracing::warn!(attempt, %error, "Failed to remove address from ingress status");
                    if attempt < CLEANUP_ATTEMPTS {
                        time::sleep(CLEANUP_BACKOFF).await;
                    }
                }
            }
        }
        tracing::error!(
            attempts = CLEANUP_ATTEMPTS,
            "Giving up on removing address from ingress status"
        );
    }
}

/// Queues a resync every `period` until shutdown is signaled.
pub async fn resync(queue: WorkQueue, period: Duration, shutdown: drain::Watch) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let shutdown = shutdown.signaled();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                queue.add(RESYNC_KEY);
            }
            _ = &mut shutdown => return,
        }
    }
}
