use crate::{tls::InvalidSecret, Index};
use ingress_controller_core::{IngressConfig, Upstream, EXTRA_CONFIG_KEY};
use ingress_controller_k8s_api::{self as k8s, ingress, IngressClass, ResourceExt, ResourceId};
use std::path::PathBuf;

/// Controller configuration that shapes the built proxy configuration.
#[derive(Clone, Debug)]
pub struct Settings {
    /// The service that receives requests no ingress rule matches.
    pub default_backend: ResourceId,

    pub ingress_class: IngressClass,

    /// A `ConfigMap` whose extra configuration is passed to the proxy verbatim.
    pub config_map: Option<ResourceId>,

    pub default_tls_secret: Option<ResourceId>,

    /// The directory in which the proxy expects TLS credential files.
    pub tls_dir: PathBuf,
}

/// Failures that prevent any configuration from being built.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("default backend service {0} not found")]
    DefaultServiceNotFound(ResourceId),

    #[error("default backend endpoints {0} not found")]
    DefaultEndpointsNotFound(ResourceId),

    #[error("default backend service {0} has no ports")]
    DefaultServiceHasNoPorts(ResourceId),

    #[error("failed to resolve default backend {id}: {source}")]
    DefaultBackend {
        id: ResourceId,
        #[source]
        source: crate::ResolveError,
    },

    #[error("default TLS secret {0} not found")]
    DefaultTlsSecretNotFound(ResourceId),

    #[error("default TLS secret {id} is invalid: {source}")]
    InvalidDefaultTlsSecret {
        id: ResourceId,
        #[source]
        source: InvalidSecret,
    },
}

impl Index {
    /// Lists the ingresses served by this controller, in namespace/name order.
    pub fn class_ingresses<'i>(
        &'i self,
        class: &'i IngressClass,
    ) -> impl Iterator<Item = &'i k8s::Ingress> + 'i {
        self.ingresses.list().filter(move |ing| class.admits(ing))
    }

    /// Builds the complete proxy configuration from the current index state.
    ///
    /// Fails only when the default backend or the configured default TLS secret cannot
    /// be resolved. An ingress whose backend cannot be resolved still contributes its
    /// upstreams, without backends.
    pub fn build_config(&self, settings: &Settings) -> Result<IngressConfig, Error> {
        let ingresses = self
            .class_ingresses(&settings.ingress_class)
            .collect::<Vec<_>>();

        let mut default_upstream = self.default_upstream(&settings.default_backend)?;

        let tls = self.resolve_tls(settings, ingresses.iter().copied())?;
        let redirect_all = tls.default.is_some();
        default_upstream.redirect_if_not_tls = redirect_all;

        let mut upstreams = vec![default_upstream];
        for ing in ingresses {
            let namespace = match ing.namespace() {
                Some(ns) => ns,
                None => continue,
            };
            let id = ResourceId::new(&namespace, ing.name_any());
            let redirect_if_not_tls = redirect_all || tls.terminated.contains(&id);

            for route in ingress::service_paths(ing) {
                let backends = match self.resolve_backends(&namespace, route.service) {
                    Ok(backends) => backends,
                    Err(error) => {
                        tracing::warn!(ingress = %id, path = %route.path, %error, "Failed to resolve backend");
                        Vec::new()
                    }
                };
                upstreams.push(Upstream {
                    host: route.host.to_string(),
                    path: route.path.to_string(),
                    backends,
                    redirect_if_not_tls,
                });
            }
        }

        Ok(IngressConfig {
            tls: tls.default.is_some(),
            default_tls_cred: tls.default,
            sub_tls_cred: tls.sub,
            upstreams,
            extra_config: self.extra_config(settings.config_map.as_ref()),
        })
    }

    /// Resolves the default backend's first service port into an upstream with an
    /// empty path.
    pub fn default_upstream(&self, id: &ResourceId) -> Result<Upstream, Error> {
        let service = self
            .services
            .get(id)
            .ok_or_else(|| Error::DefaultServiceNotFound(id.clone()))?;
        if self.endpoints.get(id).is_none() {
            return Err(Error::DefaultEndpointsNotFound(id.clone()));
        }
        let port = service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.first())
            .ok_or_else(|| Error::DefaultServiceHasNoPorts(id.clone()))?;

        let backends = self
            .resolve_service_port(id, service, port)
            .map_err(|source| Error::DefaultBackend {
                id: id.clone(),
                source,
            })?;
        if backends.is_empty() {
            tracing::warn!(service = %id, "Default backend has no active endpoints");
        }

        Ok(Upstream {
            backends,
            ..Default::default()
        })
    }

    fn extra_config(&self, id: Option<&ResourceId>) -> String {
        id.and_then(|id| self.config_maps.get(id))
            .and_then(|cm| cm.data.as_ref())
            .and_then(|data| data.get(EXTRA_CONFIG_KEY))
            .cloned()
            .unwrap_or_default()
    }
}
