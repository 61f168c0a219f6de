// Credential loading and refresh-token persistence

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::error::AuthError;
use super::types::Credential;
use crate::crypto::Fernet;

/// Load the encrypted client credential file.
///
/// Returns `Ok(None)` when the file does not exist. An existing file that
/// cannot be read or decrypted is a configuration error.
pub fn load_credential(path: &Path, key: Option<&str>) -> Result<Option<Credential>, AuthError> {
    if !path.exists() {
        tracing::debug!("No credential file at {}", path.display());
        return Ok(None);
    }

    let key = key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
        AuthError::Configuration(format!(
            "ENCRYPTION_KEY is required to decrypt {}",
            path.display()
        ))
    })?;

    let fernet = Fernet::new(key)
        .map_err(|e| AuthError::Configuration(format!("ENCRYPTION_KEY: {}", e)))?;

    let ciphertext = std::fs::read_to_string(path).map_err(|e| {
        AuthError::Configuration(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let plaintext = fernet.decrypt(&ciphertext).map_err(|e| {
        AuthError::Configuration(format!("Failed to decrypt {}: {}", path.display(), e))
    })?;

    let credential: Credential = serde_json::from_slice(&plaintext).map_err(|e| {
        AuthError::Configuration(format!(
            "Credential file {} does not contain client_id/client_secret: {}",
            path.display(),
            e
        ))
    })?;

    if credential.client_id.is_empty() || credential.client_secret.is_empty() {
        return Err(AuthError::Configuration(format!(
            "Credential file {} has an empty client_id or client_secret",
            path.display()
        )));
    }

    tracing::info!("Loaded encrypted credentials from {}", path.display());
    Ok(Some(credential))
}

/// Resolve the client credential: encrypted file first, then plaintext values.
pub fn resolve_credential(
    path: &Path,
    key: Option<&str>,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<Option<Credential>, AuthError> {
    if let Some(credential) = load_credential(path, key)? {
        return Ok(Some(credential));
    }

    match (client_id, client_secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
            tracing::warn!("Using plaintext TESLA_CLIENT_ID/TESLA_CLIENT_SECRET from environment");
            Ok(Some(Credential {
                client_id: id.to_string(),
                client_secret: secret.to_string(),
            }))
        }
        _ => Ok(None),
    }
}

/// Encrypt a credential with `key` and write it to `path`.
pub fn write_credential(path: &Path, credential: &Credential, key: &str) -> anyhow::Result<()> {
    use anyhow::Context;

    let fernet = Fernet::new(key).context("Invalid ENCRYPTION_KEY")?;
    let plaintext = serde_json::to_vec(credential).context("Failed to serialize credential")?;
    let token = fernet
        .encrypt(&plaintext)
        .context("Failed to encrypt credential")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, token).with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}

/// File holding the current refresh token
#[derive(Debug, Clone)]
pub struct RefreshTokenStore {
    path: PathBuf,
}

impl RefreshTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored refresh token. Missing or blank file means none.
    pub fn load(&self) -> Result<Option<String>, AuthError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    Ok(None)
                } else {
                    tracing::info!("Loaded refresh token from {}", self.path.display());
                    Ok(Some(token.to_string()))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthError::Configuration(format!(
                "Failed to read refresh token file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Durably replace the stored refresh token.
    ///
    /// Writes a sibling temp file (mode 0600 on Unix), fsyncs it, then renames
    /// it over the target. The temp file is removed if any step fails.
    pub async fn save(&self, refresh_token: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.path.with_extension("tmp");

        // A leftover from an interrupted write may carry other permissions
        match tokio::fs::remove_file(&tmp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        if let Err(e) = self.write_and_replace(&tmp_path, refresh_token).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {}: {}", tmp_path.display(), cleanup);
                }
            }
            return Err(e);
        }

        tracing::debug!("Persisted refresh token to {}", self.path.display());
        Ok(())
    }

    async fn write_and_replace(&self, tmp_path: &Path, refresh_token: &str) -> std::io::Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(tmp_path).await?;
        file.write_all(refresh_token.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(tmp_path, &self.path).await
    }
}
