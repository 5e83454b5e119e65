#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod config;
pub mod reload;
pub mod tls;

pub use self::{
    config::{Backend, IngressConfig, Upstream},
    reload::Reloader,
    tls::{ChecksumFile, TlsCredential},
};

/// The key, within the auxiliary `ConfigMap`, whose value is copied verbatim
/// into the proxy configuration.
pub const EXTRA_CONFIG_KEY: &str = "extra-config";
