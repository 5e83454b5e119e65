use super::*;
use ingress_controller_k8s_api::{
    self as k8s, ingress::INGRESS_CLASS_ANNOTATION, IngressClass, ObjectMeta,
};
use ingress_controller_k8s_index::{Index, SharedIndex};
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use maplit::{btreemap, hashset};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::{collections::HashSet, sync::Arc};

const CONTROLLER_NAMESPACE: &str = "kube-system";
const INGRESS_CLASS: &str = "nghttpx";

#[derive(Debug, PartialEq)]
struct Write {
    id: ResourceId,
    resource_version: Option<String>,
    addrs: Vec<k8s::IngressLoadBalancerIngress>,
}

#[derive(Default)]
struct RecordingWriter {
    writes: Mutex<Vec<Write>>,
    conflicts: HashSet<ResourceId>,
}

#[async_trait::async_trait]
impl StatusWriter for RecordingWriter {
    async fn write_status(
        &self,
        id: &ResourceId,
        resource_version: Option<&str>,
        addrs: &[k8s::IngressLoadBalancerIngress],
    ) -> Result<(), WriteError> {
        if self.conflicts.contains(id) {
            return Err(WriteError::Conflict);
        }
        self.writes.lock().push(Write {
            id: id.clone(),
            resource_version: resource_version.map(Into::into),
            addrs: addrs.to_vec(),
        });
        Ok(())
    }
}

#[test]
fn load_balancer_ingress_prefers_external_addresses() {
    let index = mk_cluster();
    let (manager, _) = mk_manager(&index, RecordingWriter::default());

    assert_eq!(
        manager.load_balancer_ingress().unwrap(),
        vec![lb_ingress("203.0.113.1".into()), lb_ingress("203.0.113.2".into())]
    );
}

#[test]
fn load_balancer_ingress_falls_back_to_internal_addresses() {
    let index = mk_cluster();
    apply(&index, mk_pod(CONTROLLER_NAMESPACE, "ingress-2", "nghttpx-ingress", "n3"));
    // Replicas sharing a node publish a single address.
    apply(&index, mk_pod(CONTROLLER_NAMESPACE, "ingress-3", "nghttpx-ingress", "n1"));
    let (manager, _) = mk_manager(&index, RecordingWriter::default());

    assert_eq!(
        manager.load_balancer_ingress().unwrap(),
        vec![
            lb_ingress("10.0.0.3".into()),
            lb_ingress("203.0.113.1".into()),
            lb_ingress("203.0.113.2".into()),
        ]
    );
}

#[test]
fn hostname_addresses() {
    assert_eq!(
        lb_ingress("lb.example.com".into()),
        k8s::IngressLoadBalancerIngress {
            hostname: Some("lb.example.com".to_string()),
            ..Default::default()
        }
    );
    assert_eq!(
        lb_ingress("2001:db8::1".into()),
        k8s::IngressLoadBalancerIngress {
            ip: Some("2001:db8::1".to_string()),
            ..Default::default()
        }
    );
}

#[test]
fn controller_pod_not_found() {
    let index = Index::shared();
    let (manager, _) = mk_manager(&index, RecordingWriter::default());

    assert!(matches!(
        manager.load_balancer_ingress(),
        Err(Error::ControllerPodNotFound(_))
    ));
    assert!(matches!(
        manager.own_address(),
        Err(Error::ControllerPodNotFound(_))
    ));
}

#[tokio::test]
async fn update_ingress_status_skips_current() {
    let index = mk_cluster();
    let (manager, writer) = mk_manager(&index, RecordingWriter::default());
    let addrs = manager.load_balancer_ingress().unwrap();

    // Already published, in a different order.
    let mut reversed = addrs.clone();
    reversed.reverse();
    apply(&index, mk_ingress("default", "alpha", Some(INGRESS_CLASS), &reversed));
    apply(&index, mk_ingress("default", "bravo", Some(INGRESS_CLASS), &[]));
    apply(
        &index,
        mk_ingress(
            "default",
            "charlie",
            Some(INGRESS_CLASS),
            &[lb_ingress("192.0.2.1".into())],
        ),
    );
    apply(&index, mk_ingress("default", "delta", Some("foo"), &[]));
    apply(&index, mk_ingress("default", "echo", None, &[]));

    let updated = manager.update_ingress_status(&addrs).await.unwrap();

    assert_eq!(updated, 2);
    assert_eq!(
        *writer.writes.lock(),
        vec![
            Write {
                id: ResourceId::new("default", "bravo"),
                resource_version: Some("1".to_string()),
                addrs: addrs.clone(),
            },
            Write {
                id: ResourceId::new("default", "charlie"),
                resource_version: Some("1".to_string()),
                addrs: addrs.clone(),
            },
        ]
    );
}

#[tokio::test]
async fn update_ingress_status_reports_conflicts() {
    let index = mk_cluster();
    let (manager, writer) = mk_manager(
        &index,
        RecordingWriter {
            conflicts: hashset! { ResourceId::new("default", "alpha") },
            ..Default::default()
        },
    );
    apply(&index, mk_ingress("default", "alpha", Some(INGRESS_CLASS), &[]));
    apply(&index, mk_ingress("default", "bravo", Some(INGRESS_CLASS), &[]));

    let addrs = manager.load_balancer_ingress().unwrap();
    let error = manager.update_ingress_status(&addrs).await.unwrap_err();

    assert!(error.is_conflict());
    match error {
        Error::Updates(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, ResourceId::new("default", "alpha"));
        }
        error => panic!("unexpected error: {}", error),
    }
    // The remaining ingress is still written.
    let writes = writer.writes.lock();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].id, ResourceId::new("default", "bravo"));
}

#[tokio::test]
async fn remove_address_keeps_other_replicas() {
    let index = mk_cluster();
    let (manager, writer) = mk_manager(&index, RecordingWriter::default());

    let own = lb_ingress("203.0.113.2".into());
    let other = lb_ingress("203.0.113.1".into());
    assert_eq!(manager.own_address().unwrap(), own);

    apply(
        &index,
        mk_ingress(
            "default",
            "alpha",
            Some(INGRESS_CLASS),
            &[own.clone(), other.clone()],
        ),
    );
    apply(
        &index,
        mk_ingress("default", "bravo", Some(INGRESS_CLASS), &[other.clone()]),
    );
    apply(&index, mk_ingress("default", "charlie", Some(INGRESS_CLASS), &[]));
    apply(&index, mk_ingress("default", "delta", Some("foo"), &[own.clone()]));

    let updated = manager
        .remove_address_from_load_balancer_ingress()
        .await
        .unwrap();

    assert_eq!(updated, 1);
    assert_eq!(
        *writer.writes.lock(),
        vec![Write {
            id: ResourceId::new("default", "alpha"),
            resource_version: Some("1".to_string()),
            addrs: vec![other],
        }]
    );
}

#[tokio::test]
async fn remove_address_requires_node_address() {
    let index = mk_cluster();
    apply(&index, mk_pod(CONTROLLER_NAMESPACE, "ingress-0", "nghttpx-ingress", "unknown"));
    let (manager, writer) = mk_manager(&index, RecordingWriter::default());

    assert!(matches!(
        manager.remove_address_from_load_balancer_ingress().await,
        Err(Error::ControllerAddressNotFound(_))
    ));
    assert!(writer.writes.lock().is_empty());
}

// === Helpers ===

fn mk_manager(
    index: &SharedIndex,
    writer: RecordingWriter,
) -> (StatusManager<Arc<RecordingWriter>>, Arc<RecordingWriter>) {
    let writer = Arc::new(writer);
    let manager = StatusManager::new(
        index.clone(),
        writer.clone(),
        ResourceId::new(CONTROLLER_NAMESPACE, "ingress-0"),
        IngressClass::new(INGRESS_CLASS),
    );
    (manager, writer)
}

/// Two controller replicas on nodes with external addresses, plus pods that are
/// not replicas.
fn mk_cluster() -> SharedIndex {
    let index = Index::shared();
    apply_node(&index, mk_node("n1", &[("InternalIP", "10.0.0.1"), ("ExternalIP", "203.0.113.1")]));
    apply_node(&index, mk_node("n2", &[("ExternalIP", "203.0.113.2")]));
    apply_node(&index, mk_node("n3", &[("Hostname", "n3"), ("InternalIP", "10.0.0.3")]));

    apply(&index, mk_pod(CONTROLLER_NAMESPACE, "ingress-0", "nghttpx-ingress", "n2"));
    apply(&index, mk_pod(CONTROLLER_NAMESPACE, "ingress-1", "nghttpx-ingress", "n1"));
    apply(&index, mk_pod(CONTROLLER_NAMESPACE, "dns-0", "kube-dns", "n3"));
    apply(&index, mk_pod("default", "ingress-0", "nghttpx-ingress", "n3"));
    index
}

fn apply<T>(index: &SharedIndex, resource: T)
where
    Index: IndexNamespacedResource<T>,
{
    IndexNamespacedResource::apply(&mut *index.write(), resource);
}

fn apply_node(index: &SharedIndex, node: k8s::Node) {
    IndexClusterResource::apply(&mut *index.write(), node);
}

fn mk_node(name: &str, addrs: &[(&str, &str)]) -> k8s::Node {
    k8s::Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(k8s::NodeStatus {
            addresses: Some(
                addrs
                    .iter()
                    .map(|(type_, address)| k8s::NodeAddress {
                        type_: type_.to_string(),
                        address: address.to_string(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_pod(ns: &str, name: &str, app: &str, node: &str) -> k8s::Pod {
    k8s::Pod {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            labels: Some(btreemap! { "app".to_string() => app.to_string() }),
            ..Default::default()
        },
        spec: Some(k8s::PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_ingress(
    ns: &str,
    name: &str,
    class: Option<&str>,
    addrs: &[k8s::IngressLoadBalancerIngress],
) -> k8s::Ingress {
    k8s::Ingress {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            resource_version: Some("1".to_string()),
            annotations: class.map(|class| {
                btreemap! { INGRESS_CLASS_ANNOTATION.to_string() => class.to_string() }
            }),
            ..Default::default()
        },
        status: Some(k8s::IngressStatus {
            load_balancer: Some(k8s::IngressLoadBalancerStatus {
                ingress: Some(addrs.to_vec()),
            }),
        }),
        ..Default::default()
    }
}
