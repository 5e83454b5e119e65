use ingress_controller_k8s_api::{self as k8s, ResourceId};
use std::time::Duration;

/// Writes load balancer addresses onto an ingress's status.
#[async_trait::async_trait]
pub trait StatusWriter: Send + Sync {
    /// Replaces the ingress's published addresses with `addrs`.
    ///
    /// When `resource_version` is set, the write only succeeds if the ingress has not changed
    /// since that version was read.
    async fn write_status(
        &self,
        id: &ResourceId,
        resource_version: Option<&str>,
        addrs: &[k8s::IngressLoadBalancerIngress],
    ) -> Result<(), WriteError>;
}

#[async_trait::async_trait]
impl<W: StatusWriter + ?Sized> StatusWriter for std::sync::Arc<W> {
    async fn write_status(
        &self,
        id: &ResourceId,
        resource_version: Option<&str>,
        addrs: &[k8s::IngressLoadBalancerIngress],
    ) -> Result<(), WriteError> {
        (**self).write_status(id, resource_version, addrs).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("ingress was modified concurrently")]
    Conflict,

    #[error("status write timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Api(k8s::Error),
}

/// Patches the `status` subresource through the Kubernetes API.
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: k8s::Client,
    timeout: Duration,
}

// === impl KubeStatusWriter ===

impl KubeStatusWriter {
    pub fn new(client: k8s::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait::async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write_status(
        &self,
        id: &ResourceId,
        resource_version: Option<&str>,
        addrs: &[k8s::IngressLoadBalancerIngress],
    ) -> Result<(), WriteError> {
        let api = k8s::Api::<k8s::Ingress>::namespaced(self.client.clone(), &id.namespace);

        let mut patch = serde_json::json!({
            "status": {
                "loadBalancer": {
                    "ingress": addrs,
                },
            },
        });
        // A merge patch carrying the resource version is rejected with a conflict if the
        // ingress changed after it was read.
        if let Some(version) = resource_version {
            patch["metadata"] = serde_json::json!({ "resourceVersion": version });
        }
        let params = k8s::PatchParams::default();

        match tokio::time::timeout(
            self.timeout,
            api.patch_status(&id.name, &params, &k8s::Patch::Merge(&patch)),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(k8s::Error::Api(e))) if e.code == 409 => Err(WriteError::Conflict),
            Ok(Err(error)) => Err(WriteError::Api(error)),
            Err(_) => Err(WriteError::Timeout(self.timeout)),
        }
    }
}
