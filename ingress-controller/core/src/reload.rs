use crate::IngressConfig;
use anyhow::Result;

/// Applies a built configuration to the proxy.
///
/// Implementations may block for as long as a reload takes; the reconciler
/// never issues concurrent calls.
#[async_trait::async_trait]
pub trait Reloader: Send + Sync {
    /// Applies `config`, returning whether the proxy's state changed.
    async fn check_and_reload(&self, config: &IngressConfig) -> Result<bool>;

    /// Drives any background work the reloader needs until shutdown is signaled.
    async fn start(&self, shutdown: drain::Watch) {
        let _ = shutdown.signaled().await;
    }
}

#[async_trait::async_trait]
impl<R: Reloader + ?Sized> Reloader for std::sync::Arc<R> {
    async fn check_and_reload(&self, config: &IngressConfig) -> Result<bool> {
        (**self).check_and_reload(config).await
    }

    async fn start(&self, shutdown: drain::Watch) {
        (**self).start(shutdown).await
    }
}
