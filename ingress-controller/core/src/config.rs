use crate::tls::TlsCredential;
use serde::Serialize;

/// The complete proxy configuration derived from the cluster's state.
///
/// This is the only value handed to a [`crate::Reloader`]. Building it twice from the
/// same cluster state must produce equal values so that reloaders can detect no-op
/// reconciles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    /// Whether the proxy terminates TLS at all.
    pub tls: bool,

    /// The credential served when no SNI-specific credential matches.
    pub default_tls_cred: Option<TlsCredential>,

    /// Additional credentials, excluding the default.
    pub sub_tls_cred: Vec<TlsCredential>,

    /// Routable upstreams. The default backend is always first.
    pub upstreams: Vec<Upstream>,

    /// Free-form configuration appended to the proxy's configuration.
    pub extra_config: String,
}

/// A resolved route and the endpoints that serve it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub host: String,
    pub path: String,
    pub backends: Vec<Backend>,
    pub redirect_if_not_tls: bool,
}

/// A single dial target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Backend {
    pub address: String,
    pub port: String,
}

// === impl IngressConfig ===

impl IngressConfig {
    /// Iterates over every credential, default first.
    pub fn tls_creds(&self) -> impl Iterator<Item = &TlsCredential> {
        self.default_tls_cred.iter().chain(self.sub_tls_cred.iter())
    }
}

// === impl Backend ===

impl Backend {
    pub fn new(address: impl ToString, port: impl ToString) -> Self {
        Self {
            address: address.to_string(),
            port: port.to_string(),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}
