//! TLS credentials as they are handed to the proxy.
//!
//! A credential's file locations are a pure function of the owning secret's
//! namespace and name, and its checksums are a pure function of the secret's
//! content. Callers may therefore recompute either and compare, without reading
//! anything back from disk.

use ring::digest;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A certificate and private key pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TlsCredential {
    pub cert: ChecksumFile,
    pub key: ChecksumFile,
}

/// A file to be written by the reloader.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumFile {
    pub path: PathBuf,
    pub checksum: String,

    #[serde(skip)]
    pub content: Vec<u8>,
}

// === impl TlsCredential ===

impl TlsCredential {
    pub fn new(dir: &Path, namespace: &str, name: &str, cert: Vec<u8>, key: Vec<u8>) -> Self {
        let prefix = tls_cred_prefix(namespace, name);
        Self {
            cert: ChecksumFile::new(tls_cert_path(dir, &prefix), cert),
            key: ChecksumFile::new(tls_key_path(dir, &prefix), key),
        }
    }
}

// === impl ChecksumFile ===

impl ChecksumFile {
    pub fn new(path: PathBuf, content: Vec<u8>) -> Self {
        Self {
            path,
            checksum: checksum(&content),
            content,
        }
    }
}

impl std::fmt::Debug for ChecksumFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksumFile")
            .field("path", &self.path)
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// Derives the file name prefix for a secret's credential files.
pub fn tls_cred_prefix(namespace: &str, name: &str) -> String {
    format!("{}_{}", namespace, name)
}

pub fn tls_cert_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{}.crt", prefix))
}

pub fn tls_key_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{}.key", prefix))
}

/// Returns the lowercase hex SHA-256 digest of `data`.
pub fn checksum(data: &[u8]) -> String {
    use std::fmt::Write;

    let digest = digest::digest(&digest::SHA256, data);
    digest
        .as_ref()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
}
