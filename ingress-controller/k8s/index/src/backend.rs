//! Resolves service references into dial targets.
//!
//! Resolution is a two step lookup. First, the port referenced by an ingress path is matched
//! against the service's ports, yielding a [`TargetPort`]. A numeric target port is used
//! as-is; a named target port is resolved through the container ports of a pod selected by the
//! service. Second, the resulting port number is matched against the service's endpoints, and
//! every endpoint address on that port becomes a [`Backend`].

use crate::Index;
use ingress_controller_core::Backend;
use ingress_controller_k8s_api::{
    self as k8s, IntOrString, Labels, ResourceExt, ResourceId, Selector,
};
use std::fmt;

/// A reference to one of a service's ports, as declared by an ingress path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortRef {
    Number(i32),
    Name(String),
}

/// The port on which a service's endpoints listen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetPort {
    Number(i32),

    /// The name of a container port on the pods selected by the service.
    Named(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("service {0} not found")]
    ServiceNotFound(ResourceId),

    #[error("endpoints {0} not found")]
    EndpointsNotFound(ResourceId),

    #[error("service {service} has no port matching {port}")]
    NoMatchingPort { service: ResourceId, port: PortRef },

    #[error("service {service} has no selected pod declaring a container port named {name}")]
    NamedPortNotFound { service: ResourceId, name: String },
}

const TCP: &str = "TCP";

// === impl PortRef ===

impl PortRef {
    pub fn from_backend_port(port: &k8s::ServiceBackendPort) -> Option<Self> {
        if let Some(name) = port.name.as_ref().filter(|n| !n.is_empty()) {
            return Some(Self::Name(name.clone()));
        }
        port.number.map(Self::Number)
    }

    /// Indicates whether the given service port is the one referenced.
    ///
    /// A reference matches on the service port itself or on its target port, so
    /// ingresses may refer to either.
    pub fn matches(&self, service_port: &k8s::ServicePort) -> bool {
        let target = service_port.target_port.as_ref().map(|tp| match tp {
            IntOrString::Int(n) => n.to_string(),
            IntOrString::String(s) => s.clone(),
        });
        match self {
            Self::Number(n) => {
                service_port.port == *n || target.as_deref() == Some(n.to_string().as_str())
            }
            Self::Name(name) => {
                service_port.name.as_deref() == Some(name.as_str())
                    || target.as_deref() == Some(name.as_str())
            }
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => fmt::Display::fmt(n, f),
            Self::Name(name) => f.write_str(name),
        }
    }
}

// === impl TargetPort ===

impl TargetPort {
    pub fn from_service_port(service_port: &k8s::ServicePort) -> Self {
        match service_port.target_port.as_ref() {
            Some(IntOrString::Int(n)) if *n != 0 => Self::Number(*n),
            Some(IntOrString::String(s)) if !s.is_empty() => match s.parse::<i32>() {
                Ok(n) => Self::Number(n),
                Err(_) => Self::Named(s.clone()),
            },
            // An unset target port defaults to the service port.
            _ => Self::Number(service_port.port),
        }
    }
}

// === impl Index ===

impl Index {
    /// Resolves an ingress path's service backend, in the ingress's namespace, to the
    /// endpoints that serve it.
    pub fn resolve_backends(
        &self,
        namespace: &str,
        backend: &k8s::IngressServiceBackend,
    ) -> Result<Vec<Backend>, ResolveError> {
        let id = ResourceId::new(namespace, &backend.name);
        let service = self
            .services
            .get(&id)
            .ok_or_else(|| ResolveError::ServiceNotFound(id.clone()))?;

        let ports = service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_deref())
            .unwrap_or_default();
        let port_ref = backend.port.as_ref().and_then(PortRef::from_backend_port);
        let service_port = match port_ref {
            Some(ref port_ref) => ports.iter().find(|sp| port_ref.matches(sp)),
            None => ports.first(),
        }
        .ok_or_else(|| ResolveError::NoMatchingPort {
            service: id.clone(),
            port: port_ref.clone().unwrap_or(PortRef::Number(0)),
        })?;

        self.resolve_service_port(&id, service, service_port)
    }

    /// Resolves a single port of a service to the endpoints that serve it.
    pub fn resolve_service_port(
        &self,
        id: &ResourceId,
        service: &k8s::Service,
        service_port: &k8s::ServicePort,
    ) -> Result<Vec<Backend>, ResolveError> {
        let endpoints = self
            .endpoints
            .get(id)
            .ok_or_else(|| ResolveError::EndpointsNotFound(id.clone()))?;

        let port = match TargetPort::from_service_port(service_port) {
            TargetPort::Number(port) => port,
            TargetPort::Named(name) => self
                .named_port(service, &name)
                .ok_or(ResolveError::NamedPortNotFound {
                    service: id.clone(),
                    name,
                })?,
        };

        Ok(endpoint_backends(endpoints, port))
    }

    /// Finds the numeric value of a named container port on a pod selected by the
    /// service.
    ///
    /// Pods are searched in name order and the first pod declaring the port wins.
    /// A service without a selector selects no pods.
    pub fn named_port(&self, service: &k8s::Service, name: &str) -> Option<i32> {
        let namespace = service.namespace()?;
        let selector = service
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.clone())
            .map(Selector::from_map)
            .filter(|s| !s.is_empty())?;

        let port = self
            .pods
            .list_namespace(&namespace)
            .filter(|pod| selector.matches(&Labels::from(pod.metadata.labels.clone())))
            .find_map(|pod| container_port(pod, name));
        port
    }
}

fn container_port(pod: &k8s::Pod, name: &str) -> Option<i32> {
    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .flat_map(|c| c.ports.iter().flatten())
        .find(|p| p.name.as_deref() == Some(name))
        .map(|p| p.container_port)
}

/// Lists every TCP endpoint address listening on `port`, in the order the
/// endpoints object declares them.
fn endpoint_backends(endpoints: &k8s::Endpoints, port: i32) -> Vec<Backend> {
    let mut backends = Vec::new();
    for subset in endpoints.subsets.iter().flatten() {
        let listening = subset.ports.iter().flatten().any(|ep| {
            ep.port == port && ep.protocol.as_deref().unwrap_or(TCP) == TCP
        });
        if !listening {
            continue;
        }

        for addr in subset.addresses.iter().flatten() {
            backends.push(Backend::new(&addr.ip, port));
        }
    }
    backends
}
