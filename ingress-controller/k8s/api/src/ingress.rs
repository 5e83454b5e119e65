//! Helpers for reading `Ingress` resources.

use k8s_openapi::api::networking::v1::{Ingress, IngressLoadBalancerIngress, IngressServiceBackend};
use kube::ResourceExt;

/// The annotation that partitions ingresses among competing controllers.
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// The ingress class served by this controller.
///
/// An empty class admits every ingress. Otherwise only ingresses annotated with
/// exactly this class are admitted; unannotated ingresses are excluded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngressClass(String);

/// A single `host`/`path` to service mapping declared by an ingress rule.
#[derive(Clone, Debug, PartialEq)]
pub struct ServicePath<'i> {
    pub host: &'i str,
    pub path: &'i str,
    pub service: &'i IngressServiceBackend,
}

// === impl IngressClass ===

impl IngressClass {
    pub fn new(class: impl ToString) -> Self {
        Self(class.to_string())
    }

    pub fn admits(&self, ingress: &Ingress) -> bool {
        if self.0.is_empty() {
            return true;
        }
        ingress_class(ingress) == Some(self.0.as_str())
    }
}

impl std::fmt::Display for IngressClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn ingress_class(ingress: &Ingress) -> Option<&str> {
    ingress
        .annotations()
        .get(INGRESS_CLASS_ANNOTATION)
        .map(String::as_str)
}

/// Lists the addresses currently published on an ingress's status.
pub fn load_balancer_ingresses(ingress: &Ingress) -> &[IngressLoadBalancerIngress] {
    ingress
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .unwrap_or_default()
}

/// Orders load balancer addresses by IP and then hostname so that lists may be
/// compared directly.
pub fn sort_load_balancer_ingresses(addrs: &mut [IngressLoadBalancerIngress]) {
    addrs.sort_by(|a, b| (&a.ip, &a.hostname).cmp(&(&b.ip, &b.hostname)));
}

/// Enumerates the service-backed paths of every rule on the ingress, in
/// declaration order. Paths with a non-service backend are omitted.
pub fn service_paths(ingress: &Ingress) -> impl Iterator<Item = ServicePath<'_>> {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .flat_map(|rule| {
            let host = rule.host.as_deref().unwrap_or_default();
            rule.http
                .iter()
                .flat_map(|http| http.paths.iter())
                .filter_map(move |p| {
                    Some(ServicePath {
                        host,
                        path: p.path.as_deref().unwrap_or_default(),
                        service: p.backend.service.as_ref()?,
                    })
                })
        })
}

/// Enumerates the secret names referenced by the ingress's TLS bindings.
pub fn tls_secret_names(ingress: &Ingress) -> impl Iterator<Item = &str> {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.tls.iter().flatten())
        .filter_map(|tls| tls.secret_name.as_deref())
}
