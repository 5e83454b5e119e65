use crate::{Error, Index, Settings};
use ahash::AHashSet as HashSet;
use ingress_controller_core::TlsCredential;
use ingress_controller_k8s_api::{self as k8s, ingress, ResourceExt, ResourceId};
use std::path::Path;

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// The credentials needed to terminate TLS for a set of ingresses.
#[derive(Debug, Default)]
pub struct TlsCredentials {
    pub default: Option<TlsCredential>,

    /// Credentials other than the default, in ingress order, each appearing once.
    pub sub: Vec<TlsCredential>,

    /// Ingresses with at least one usable TLS binding.
    pub terminated: HashSet<ResourceId>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidSecret {
    #[error("secret is missing {0}")]
    MissingKey(&'static str),
}

impl Index {
    /// Resolves the configured default credential and every credential referenced by
    /// `ingresses`.
    ///
    /// Credentials are identified by their secret: a secret referenced more than once,
    /// including the default secret, appears once. When no default is configured, the
    /// first referenced credential is promoted to the default.
    pub fn resolve_tls<'i>(
        &self,
        settings: &Settings,
        ingresses: impl IntoIterator<Item = &'i k8s::Ingress>,
    ) -> Result<TlsCredentials, Error> {
        let mut creds = TlsCredentials::default();
        let mut seen = HashSet::new();

        if let Some(id) = settings.default_tls_secret.as_ref() {
            let cred = self
                .tls_credential(&settings.tls_dir, id)
                .ok_or_else(|| Error::DefaultTlsSecretNotFound(id.clone()))?
                .map_err(|source| Error::InvalidDefaultTlsSecret {
                    id: id.clone(),
                    source,
                })?;
            creds.default = Some(cred);
            seen.insert(id.clone());
        }

        for ing in ingresses {
            let namespace = match ing.namespace() {
                Some(ns) => ns,
                None => continue,
            };
            let ing_id = ResourceId::new(&namespace, ing.name_any());

            for secret_name in ingress::tls_secret_names(ing) {
                let id = ResourceId::new(&namespace, secret_name);
                if seen.contains(&id) {
                    creds.terminated.insert(ing_id.clone());
                    continue;
                }

                match self.tls_credential(&settings.tls_dir, &id) {
                    Some(Ok(cred)) => {
                        creds.sub.push(cred);
                        creds.terminated.insert(ing_id.clone());
                        seen.insert(id);
                    }
                    Some(Err(error)) => {
                        tracing::warn!(ingress = %ing_id, secret = %id, %error, "Ignoring TLS secret");
                    }
                    None => {
                        tracing::warn!(ingress = %ing_id, secret = %id, "TLS secret not found");
                    }
                }
            }
        }

        if creds.default.is_none() && !creds.sub.is_empty() {
            creds.default = Some(creds.sub.remove(0));
        }

        Ok(creds)
    }

    fn tls_credential(
        &self,
        dir: &Path,
        id: &ResourceId,
    ) -> Option<Result<TlsCredential, InvalidSecret>> {
        let secret = self.secrets.get(id)?;
        Some(credential_from_secret(dir, id, secret))
    }
}

fn credential_from_secret(
    dir: &Path,
    id: &ResourceId,
    secret: &k8s::Secret,
) -> Result<TlsCredential, InvalidSecret> {
    let data = |key: &'static str| {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|k8s::ByteString(bytes)| bytes.clone())
            .ok_or(InvalidSecret::MissingKey(key))
    };
    let cert = data(TLS_CERT_KEY)?;
    let key = data(TLS_PRIVATE_KEY_KEY)?;
    Ok(TlsCredential::new(dir, &id.namespace, &id.name, cert, key))
}
