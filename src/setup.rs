// Interactive credential encryption (`tesla-mcp encrypt-credentials`)

use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use std::path::Path;

use crate::auth::{write_credential, Credential};
use crate::config::Config;
use crate::crypto::Fernet;

/// Prompt for client credentials, encrypt them and write the credential file.
///
/// Uses ENCRYPTION_KEY when set; otherwise generates a key and appends it
/// to `env_file`.
pub fn run_encrypt_credentials(config: &Config, env_file: &Path) -> Result<()> {
    let key = match config.encryption_key.clone() {
        Some(key) => {
            println!("Using existing ENCRYPTION_KEY.");
            key
        }
        None => {
            println!("ENCRYPTION_KEY not found. A new key will be generated.");
            let key = Fernet::generate_key().context("Failed to generate encryption key")?;
            match append_key_to_env_file(env_file, &key) {
                Ok(true) => println!("Saved new ENCRYPTION_KEY to {}", env_file.display()),
                Ok(false) => {
                    println!(
                        "{} already has an ENCRYPTION_KEY line that could not be loaded; check its format.",
                        env_file.display()
                    );
                    println!("Using the newly generated key for this run only.");
                }
                Err(e) => {
                    println!("Could not update {}: {:#}", env_file.display(), e);
                    println!("Add this line manually: ENCRYPTION_KEY={}", key);
                }
            }
            key
        }
    };

    Fernet::new(&key).context(
        "ENCRYPTION_KEY is invalid; a Fernet key is 32 url-safe base64-encoded bytes",
    )?;

    let client_id: String = Input::new()
        .with_prompt("Tesla Client ID")
        .interact_text()
        .context("Failed to read client id")?;
    let client_secret: String = Password::new()
        .with_prompt("Tesla Client Secret")
        .interact()
        .context("Failed to read client secret")?;

    let credential = Credential {
        client_id: client_id.trim().to_string(),
        client_secret: client_secret.trim().to_string(),
    };
    if credential.client_id.is_empty() || credential.client_secret.is_empty() {
        anyhow::bail!("Client ID and Client Secret cannot be empty");
    }

    write_credential(&config.credentials_file, &credential, &key)?;
    println!(
        "Encrypted credentials written to {}",
        config.credentials_file.display()
    );

    Ok(())
}

/// Append `ENCRYPTION_KEY=<key>` to the env file unless it already has one.
///
/// Returns whether the file was changed.
pub fn append_key_to_env_file(env_file: &Path, key: &str) -> Result<bool> {
    let existing = match std::fs::read_to_string(env_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", env_file.display()))
        }
    };

    if existing
        .lines()
        .any(|line| line.trim_start().starts_with("ENCRYPTION_KEY="))
    {
        return Ok(false);
    }

    let mut contents = existing;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&format!("ENCRYPTION_KEY={}\n", key));

    std::fs::write(env_file, contents)
        .with_context(|| format!("Failed to write {}", env_file.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_key_creates_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");

        assert!(append_key_to_env_file(&env_file, "abc").unwrap());
        assert_eq!(std::fs::read_to_string(&env_file).unwrap(), "ENCRYPTION_KEY=abc\n");
    }

    #[test]
    fn test_append_key_preserves_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(&env_file, "SERVER_PORT=9000").unwrap();

        assert!(append_key_to_env_file(&env_file, "abc").unwrap());
        assert_eq!(
            std::fs::read_to_string(&env_file).unwrap(),
            "SERVER_PORT=9000\nENCRYPTION_KEY=abc\n"
        );
    }

    #[test]
    fn test_append_key_leaves_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(&env_file, "ENCRYPTION_KEY=old\n").unwrap();

        assert!(!append_key_to_env_file(&env_file, "new").unwrap());
        assert_eq!(std::fs::read_to_string(&env_file).unwrap(), "ENCRYPTION_KEY=old\n");
    }
}
