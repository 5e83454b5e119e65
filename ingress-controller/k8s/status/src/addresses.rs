use ingress_controller_k8s_api::{self as k8s, ingress, Labels, Selector};
use ingress_controller_k8s_index::Index;
use std::net::IpAddr;

const EXTERNAL_IP: &str = "ExternalIP";
const INTERNAL_IP: &str = "InternalIP";

/// Lists the node addresses of every pod in `namespace` matched by `selector`.
///
/// The result is sorted and free of duplicates, so replicas sharing a node
/// contribute one address and the list can be compared with a published status
/// directly. Pods that are not yet scheduled, or whose node is unknown, are
/// skipped.
pub fn load_balancer_ingress(
    index: &Index,
    namespace: &str,
    selector: &Selector,
) -> Vec<k8s::IngressLoadBalancerIngress> {
    let mut addrs = index
        .pods()
        .list_namespace(namespace)
        .filter(|pod| selector.matches(&Labels::from(pod.metadata.labels.clone())))
        .filter_map(|pod| pod_address(index, pod))
        .map(lb_ingress)
        .collect::<Vec<_>>();
    ingress::sort_load_balancer_ingresses(&mut addrs);
    addrs.dedup();
    addrs
}

/// Returns the address of the node on which `pod` is scheduled.
pub fn pod_address(index: &Index, pod: &k8s::Pod) -> Option<String> {
    let node_name = pod.spec.as_ref()?.node_name.as_deref()?;
    match index.node(node_name) {
        Some(node) => node_address(node),
        None => {
            tracing::debug!(node = %node_name, "Node not found");
            None
        }
    }
}

/// Prefers the node's external address, falling back to its internal address.
pub fn node_address(node: &k8s::Node) -> Option<String> {
    let addrs = node.status.as_ref()?.addresses.as_deref()?;
    let find = |type_: &str| {
        addrs
            .iter()
            .find(|a| a.type_ == type_ && !a.address.is_empty())
            .map(|a| a.address.clone())
    };
    find(EXTERNAL_IP).or_else(|| find(INTERNAL_IP))
}

/// Publishes an address as an IP when it parses as one and as a hostname otherwise.
pub fn lb_ingress(address: String) -> k8s::IngressLoadBalancerIngress {
    if address.parse::<IpAddr>().is_ok() {
        k8s::IngressLoadBalancerIngress {
            ip: Some(address),
            ..Default::default()
        }
    } else {
        k8s::IngressLoadBalancerIngress {
            hostname: Some(address),
            ..Default::default()
        }
    }
}
