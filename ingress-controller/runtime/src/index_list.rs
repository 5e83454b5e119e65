use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use parking_lot::RwLock;
use std::sync::Arc;

/// Fans each watch event out to several indexes.
///
/// Indexes receive an event in the order they were added, so an index pushed after
/// the resource cache observes events only once the cache reflects them.
pub struct IndexList<A, T> {
    index: Arc<RwLock<A>>,
    tail: Option<T>,
}

impl<A, T, R> IndexNamespacedResource<R> for IndexList<A, T>
where
    A: IndexNamespacedResource<R>,
    T: IndexNamespacedResource<R>,
    R: Clone,
{
    fn apply(&mut self, resource: R) {
        if let Some(tail) = &mut self.tail {
            tail.apply(resource.clone());
        }
        self.index.write().apply(resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(tail) = &mut self.tail {
            tail.delete(namespace.clone(), name.clone());
        }
        self.index.write().delete(namespace, name);
    }
}

impl<A, T, R> IndexClusterResource<R> for IndexList<A, T>
where
    A: IndexClusterResource<R>,
    T: IndexClusterResource<R>,
    R: Clone,
{
    fn apply(&mut self, resource: R) {
        if let Some(tail) = &mut self.tail {
            tail.apply(resource.clone());
        }
        self.index.write().apply(resource);
    }

    fn delete(&mut self, name: String) {
        if let Some(tail) = &mut self.tail {
            tail.delete(name.clone());
        }
        self.index.write().delete(name);
    }
}

impl<A> IndexList<A, A> {
    pub fn new(index: Arc<RwLock<A>>) -> Self {
        IndexList { index, tail: None }
    }
}

impl<A, T> IndexList<A, T> {
    pub fn push<B>(self, index: Arc<RwLock<B>>) -> IndexList<B, Self> {
        IndexList {
            index,
            tail: Some(self),
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{index::Index, k8s, queue::WorkQueue};
    use k8s::ResourceExt;

    #[tokio::test]
    async fn queues_after_indexing() {
        let index = Index::shared();
        let queue = WorkQueue::new(10);
        let mut list = IndexList::new(index.clone())
            .push(Arc::new(RwLock::new(queue.clone())));

        let mut svc = k8s::Service::default();
        svc.metadata.namespace = Some("default".to_string());
        svc.metadata.name = Some("alpha".to_string());
        IndexNamespacedResource::apply(&mut list, svc);

        assert_eq!(index.read().services().len(), 1);
        assert_eq!(queue.next().await.as_deref(), Some("default/alpha"));

        let mut node = k8s::Node::default();
        node.metadata.name = Some("n1".to_string());
        IndexClusterResource::apply(&mut list, node);
        assert_eq!(
            index.read().nodes().map(|n| n.name_any()).collect::<Vec<_>>(),
            vec!["n1"]
        );
        assert_eq!(queue.next().await.as_deref(), Some("n1"));

        IndexNamespacedResource::<k8s::Service>::delete(
            &mut list,
            "default".to_string(),
            "alpha".to_string(),
        );
        assert!(index.read().services().is_empty());
        assert_eq!(queue.next().await.as_deref(), Some("default/alpha"));
    }
}
