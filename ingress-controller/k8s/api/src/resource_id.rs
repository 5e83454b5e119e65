use std::{fmt, str::FromStr};

/// Identifies a namespaced resource.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[error("invalid resource reference {0:?}: expected <namespace>/<name>")]
pub struct InvalidResourceId(String);

impl ResourceId {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Identifies a resource by its metadata, if it is namespaced.
    pub fn from_resource<T: kube::ResourceExt>(resource: &T) -> Option<Self> {
        let namespace = resource.namespace()?;
        Some(Self::new(namespace, resource.name_any()))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = InvalidResourceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(InvalidResourceId(s.to_string())),
        }
    }
}
