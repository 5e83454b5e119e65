//! Publishes the controller's addresses on ingress status.
//!
//! Each controller replica runs on a node, and that node's address (external if it has one,
//! internal otherwise) is where the replica accepts traffic. The set of addresses across all
//! replicas is written to `status.loadBalancer.ingress` of every ingress the controller serves.
//! When a replica shuts down it removes its own node's address, leaving those published by other
//! replicas in place.
//!
//! Replicas are found through the controller's own pod: its labels select its siblings in the
//! same namespace.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod addresses;
mod manager;
mod writer;

#[cfg(test)]
mod tests;

pub use self::{
    addresses::{lb_ingress, load_balancer_ingress, node_address, pod_address},
    manager::StatusManager,
    writer::{KubeStatusWriter, StatusWriter, WriteError},
};
use ingress_controller_k8s_api::ResourceId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("controller pod {0} not found")]
    ControllerPodNotFound(ResourceId),

    #[error("no node address found for controller pod {0}")]
    ControllerAddressNotFound(ResourceId),

    #[error("failed to update the status of {} ingress(es)", .0.len())]
    Updates(Vec<(ResourceId, WriteError)>),
}

impl Error {
    /// Indicates whether any failed write lost an optimistic concurrency race.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Updates(failures) => failures
                .iter()
                .any(|(_, error)| matches!(error, WriteError::Conflict)),
            _ => false,
        }
    }
}
