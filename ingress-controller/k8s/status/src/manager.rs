use crate::{lb_ingress, load_balancer_ingress, pod_address, Error, StatusWriter};
use ingress_controller_k8s_api::{
    self as k8s, ingress, IngressClass, Labels, ResourceExt, ResourceId, Selector,
};
use ingress_controller_k8s_index::{Index, SharedIndex};

/// Reconciles this controller's load balancer addresses onto the status of the
/// ingresses it serves.
pub struct StatusManager<W> {
    index: SharedIndex,
    writer: W,
    controller: ResourceId,
    ingress_class: IngressClass,
}

/// An ingress's published addresses as of the index snapshot.
struct Published {
    id: ResourceId,
    resource_version: Option<String>,
    addrs: Vec<k8s::IngressLoadBalancerIngress>,
}

// === impl StatusManager ===

impl<W: StatusWriter> StatusManager<W> {
    /// `controller` identifies this controller's own pod.
    pub fn new(
        index: SharedIndex,
        writer: W,
        controller: ResourceId,
        ingress_class: IngressClass,
    ) -> Self {
        Self {
            index,
            writer,
            controller,
            ingress_class,
        }
    }

    /// Lists the addresses of every controller replica, sorted.
    pub fn load_balancer_ingress(&self) -> Result<Vec<k8s::IngressLoadBalancerIngress>, Error> {
        let index = self.index.read();
        let selector = Selector::from(&Labels::from(
            self.controller_pod(&index)?.metadata.labels.clone(),
        ));
        let addrs = load_balancer_ingress(&index, &self.controller.namespace, &selector);
        tracing::debug!(%selector, addrs = addrs.len(), "Found controller replicas");
        Ok(addrs)
    }

    /// Returns the address of the node running this replica.
    pub fn own_address(&self) -> Result<k8s::IngressLoadBalancerIngress, Error> {
        let index = self.index.read();
        let pod = self.controller_pod(&index)?;
        pod_address(&index, pod)
            .map(lb_ingress)
            .ok_or_else(|| Error::ControllerAddressNotFound(self.controller.clone()))
    }

    /// Publishes `addrs` on every served ingress whose status differs, returning the
    /// number of ingresses written.
    ///
    /// Every differing ingress is attempted even if some writes fail; failures are
    /// reported together.
    pub async fn update_ingress_status(
        &self,
        addrs: &[k8s::IngressLoadBalancerIngress],
    ) -> Result<usize, Error> {
        let mut desired = addrs.to_vec();
        ingress::sort_load_balancer_ingresses(&mut desired);
        desired.dedup();

        let mut updated = 0;
        let mut failures = Vec::new();
        for Published {
            id,
            resource_version,
            mut addrs,
        } in self.published()
        {
            ingress::sort_load_balancer_ingresses(&mut addrs);
            if addrs == desired {
                tracing::trace!(ingress = %id, "Status is current");
                continue;
            }

            match self
                .writer
                .write_status(&id, resource_version.as_deref(), &desired)
                .await
            {
                Ok(()) => {
                    tracing::debug!(ingress = %id, "Updated status");
                    updated += 1;
                }
                Err(error) => {
                    tracing::warn!(ingress = %id, %error, "Failed to update status");
                    failures.push((id, error));
                }
            }
        }

        if failures.is_empty() {
            Ok(updated)
        } else {
            Err(Error::Updates(failures))
        }
    }

    /// Removes this replica's address from every served ingress that publishes it,
    /// returning the number of ingresses written.
    ///
    /// Addresses published by other replicas are kept. Ingresses that do not
    /// publish this replica's address are not written, so repeated calls are
    /// harmless.
    pub async fn remove_address_from_load_balancer_ingress(&self) -> Result<usize, Error> {
        let own = self.own_address()?;
        tracing::info!(address = ?own, "Removing address from ingress status");

        let mut updated = 0;
        let mut failures = Vec::new();
        for Published {
            id,
            resource_version,
            addrs,
        } in self.published()
        {
            if !addrs.contains(&own) {
                continue;
            }
            let mut remaining = addrs
                .into_iter()
                .filter(|a| *a != own)
                .collect::<Vec<_>>();
            ingress::sort_load_balancer_ingresses(&mut remaining);

            match self
                .writer
                .write_status(&id, resource_version.as_deref(), &remaining)
                .await
            {
                Ok(()) => {
                    tracing::debug!(ingress = %id, "Removed address from status");
                    updated += 1;
                }
                Err(error) => {
                    tracing::warn!(ingress = %id, %error, "Failed to remove address from status");
                    failures.push((id, error));
                }
            }
        }

        if failures.is_empty() {
            Ok(updated)
        } else {
            Err(Error::Updates(failures))
        }
    }

    fn controller_pod<'i>(&self, index: &'i Index) -> Result<&'i k8s::Pod, Error> {
        index
            .pods()
            .get(&self.controller)
            .ok_or_else(|| Error::ControllerPodNotFound(self.controller.clone()))
    }

    // Snapshots the status of served ingresses so that no lock is held while writing.
    fn published(&self) -> Vec<Published> {
        let index = self.index.read();
        index
            .class_ingresses(&self.ingress_class)
            .filter_map(|ing| {
                Some(Published {
                    id: ResourceId::from_resource(ing)?,
                    resource_version: ing.resource_version(),
                    addrs: ingress::load_balancer_ingresses(ing).to_vec(),
                })
            })
            .collect()
    }
}
