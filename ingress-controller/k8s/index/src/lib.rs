//! Ingress controller resource index
//!
//! The index holds the controller's view of the cluster. It is populated by watches on the
//! following resources and is read, as a single snapshot, each time the proxy configuration is
//! rebuilt:
//!
//! - Each `Ingress` declares host/path routes to service ports and the secrets that terminate
//!   TLS for it. Only ingresses that belong to the configured ingress class are considered.
//! - Each `Service` maps its ports onto target ports. A target port may be a number or the name
//!   of a container port declared by the `Pod`s the service selects.
//! - Each `Endpoints` lists the live addresses and ports that back a service.
//! - Each `Secret` referenced by an ingress (or configured as the default) provides a TLS
//!   certificate and key.
//! - A single `ConfigMap` may carry extra proxy configuration.
//! - `Pod`s and `Node`s locate the controller's own replicas so that their node addresses can
//!   be published on ingress status.
//!
//! ```text
//! [ Ingress ] -> [ Service ] -> [ Endpoints ]
//!      |              '--> [ Pod ] (named target ports)
//!      '--> [ Secret ]
//! ```
//!
//! Building a configuration never mutates the index, so the same index state always produces
//! the same [`IngressConfig`](ingress_controller_core::IngressConfig).

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod backend;
mod config;
mod store;
pub mod tls;


pub use self::{
    backend::{PortRef, ResolveError, TargetPort},
    config::{Error, Settings},
    store::Store,
};
use ingress_controller_k8s_api::{self as k8s, ResourceExt, ResourceId};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds every resource the controller reads, keyed by namespace and name.
#[derive(Debug, Default)]
pub struct Index {
    ingresses: Store<k8s::Ingress>,
    services: Store<k8s::Service>,
    endpoints: Store<k8s::Endpoints>,
    secrets: Store<k8s::Secret>,
    config_maps: Store<k8s::ConfigMap>,
    pods: Store<k8s::Pod>,
    nodes: BTreeMap<String, k8s::Node>,
}

/// A namespaced resource kind held by the [`Index`].
pub trait Indexed: ResourceExt<DynamicType = ()> + Sized {
    fn store_mut(index: &mut Index) -> &mut Store<Self>;
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn ingresses(&self) -> &Store<k8s::Ingress> {
        &self.ingresses
    }

    pub fn services(&self) -> &Store<k8s::Service> {
        &self.services
    }

    pub fn endpoints(&self) -> &Store<k8s::Endpoints> {
        &self.endpoints
    }

    pub fn secrets(&self) -> &Store<k8s::Secret> {
        &self.secrets
    }

    pub fn config_maps(&self) -> &Store<k8s::ConfigMap> {
        &self.config_maps
    }

    pub fn pods(&self) -> &Store<k8s::Pod> {
        &self.pods
    }

    pub fn node(&self, name: &str) -> Option<&k8s::Node> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &k8s::Node> {
        self.nodes.values()
    }
}

impl<T: Indexed> kubert::index::IndexNamespacedResource<T> for Index {
    fn apply(&mut self, resource: T) {
        let id = match ResourceId::from_resource(&resource) {
            Some(id) => id,
            None => {
                tracing::warn!(name = %resource.name_any(), "Ignoring resource without a namespace");
                return;
            }
        };
        tracing::trace!(%id, kind = %T::kind(&()), "Applying");
        T::store_mut(self).insert(id, resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        if T::store_mut(self).remove(&id).is_none() {
            tracing::debug!(%id, "Resource already removed");
        }
    }

    // Since apply only replaces a single resource at a time, there's no need
    // to handle resets specially.
}

impl kubert::index::IndexClusterResource<k8s::Node> for Index {
    fn apply(&mut self, node: k8s::Node) {
        self.nodes.insert(node.name_any(), node);
    }

    fn delete(&mut self, name: String) {
        self.nodes.remove(&name);
    }
}

macro_rules! indexed {
    ($kind:ty => $field:ident) => {
        impl Indexed for $kind {
            fn store_mut(index: &mut Index) -> &mut Store<Self> {
                &mut index.$field
            }
        }
    };
}

indexed!(k8s::Ingress => ingresses);
indexed!(k8s::Service => services);
indexed!(k8s::Endpoints => endpoints);
indexed!(k8s::Secret => secrets);
indexed!(k8s::ConfigMap => config_maps);
indexed!(k8s::Pod => pods);
