use ingress_controller_k8s_api::ResourceId;
use std::collections::BTreeMap;

/// Holds the latest state of a single namespaced resource kind.
///
/// Resources are ordered by namespace and then name, so listing is
/// deterministic regardless of the order in which watch events arrive.
#[derive(Debug)]
pub struct Store<T> {
    by_id: BTreeMap<ResourceId, T>,
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            by_id: BTreeMap::new(),
        }
    }
}

impl<T> Store<T> {
    pub fn get(&self, id: &ResourceId) -> Option<&T> {
        self.by_id.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &T> {
        self.by_id.values()
    }

    pub fn list_namespace<'s>(&'s self, namespace: &'s str) -> impl Iterator<Item = &'s T> + 's {
        self.by_id
            .range(ResourceId::new(namespace, "")..)
            .take_while(move |(id, _)| id.namespace == namespace)
            .map(|(_, resource)| resource)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub(crate) fn insert(&mut self, id: ResourceId, resource: T) -> Option<T> {
        self.by_id.insert(id, resource)
    }

    pub(crate) fn remove(&mut self, id: &ResourceId) -> Option<T> {
        self.by_id.remove(id)
    }
}
