use crate::core::{ChecksumFile, IngressConfig, Reloader};
use ahash::AHashSet as HashSet;
use anyhow::{bail, Context, Result};
use std::{
    fs::Permissions,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt, process::Command, sync::Mutex};

/// The name of the rendered configuration file within the configuration directory.
pub const CONFIG_FILE: &str = "ingress.json";

const PUBLIC_MODE: u32 = 0o644;
const PRIVATE_MODE: u32 = 0o600;

/// Applies configurations by writing them to disk and running a reload command.
///
/// The last applied configuration is kept in memory so that an unchanged
/// configuration causes neither writes nor a reload.
#[derive(Debug)]
pub struct FileReloader {
    config_dir: PathBuf,
    tls_dir: PathBuf,
    reload_command: Option<Vec<String>>,
    applied: Mutex<Option<IngressConfig>>,
}

// === impl FileReloader ===

impl FileReloader {
    /// `reload_command` is split on whitespace into a program and its arguments.
    pub fn new(config_dir: PathBuf, tls_dir: PathBuf, reload_command: Option<String>) -> Self {
        let reload_command = reload_command
            .map(|cmd| cmd.split_whitespace().map(Into::into).collect::<Vec<_>>())
            .filter(|argv| !argv.is_empty());
        Self {
            config_dir,
            tls_dir,
            reload_command,
            applied: Mutex::new(None),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    async fn reload(&self, argv: &[String]) -> Result<()> {
        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run {}", program))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Removes credential files in the TLS directory that `config` no longer
    /// references.
    async fn prune_credentials(&self, config: &IngressConfig) -> Result<()> {
        let referenced = config
            .tls_creds()
            .flat_map(|cred| [cred.cert.path.as_path(), cred.key.path.as_path()])
            .collect::<HashSet<_>>();

        let mut entries = match fs::read_dir(&self.tls_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to list {}", self.tls_dir.display()));
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_credential = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("crt" | "key")
            );
            if !is_credential || referenced.contains(path.as_path()) {
                continue;
            }
            fs::remove_file(&path)
                .await
                .with_context(|| format!("failed to remove {}", path.display()))?;
            tracing::debug!(path = %path.display(), "Removed stale credential");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reloader for FileReloader {
    async fn check_and_reload(&self, config: &IngressConfig) -> Result<bool> {
        let mut applied = self.applied.lock().await;
        if applied.as_ref() == Some(config) {
            tracing::debug!("Configuration unchanged");
            return Ok(false);
        }

        for cred in config.tls_creds() {
            write_file(&cred.cert, PUBLIC_MODE).await?;
            write_file(&cred.key, PRIVATE_MODE).await?;
        }

        let json = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.config_path(), &json, PUBLIC_MODE).await?;

        if let Some(argv) = self.reload_command.as_deref() {
            self.reload(argv).await?;
        }

        // The proxy no longer reads credentials the new configuration dropped.
        self.prune_credentials(config).await?;

        tracing::info!(
            upstreams = config.upstreams.len(),
            credentials = config.tls_creds().count(),
            "Applied configuration"
        );
        *applied = Some(config.clone());
        Ok(true)
    }

    async fn start(&self, shutdown: drain::Watch) {
        for dir in [&self.config_dir, &self.tls_dir] {
            if let Err(error) = fs::create_dir_all(dir).await {
                tracing::error!(dir = %dir.display(), %error, "Failed to create directory");
            }
        }
        let _ = shutdown.signaled().await;
    }
}

async fn write_file(file: &ChecksumFile, mode: u32) -> Result<()> {
    write_atomic(&file.path, &file.content, mode).await
}

/// Replaces `path` with `content`, so that readers never observe a partial file.
///
/// The file carries `mode` before any content is written to it.
async fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let write = async {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp)
            .await?;
        // A leftover temporary file keeps its old mode when opened.
        file.set_permissions(Permissions::from_mode(mode)).await?;
        file.write_all(content).await?;
        file.sync_all().await
    };
    write
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to rename {} to {}", tmp.display(), path.display()))?;
    Ok(())
}
