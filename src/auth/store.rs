//! Encrypted on-disk credential store
//!
//! The token pair and the denormalized identity fields are persisted as a
//! single encrypted blob. One file means the group is written and cleared
//! atomically: there is no state where the tokens are gone but identity
//! fields linger, or vice versa.

use aes_gcm::{
    aead::{
        rand_core::{OsRng, RngCore},
        Aead, KeyInit,
    },
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Result};
use argon2::Argon2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data_paths::DataPaths;
use crate::types::UserIdentity;

/// Environment variable supplying the encryption passphrase
pub const PASSPHRASE_ENV: &str = "FOLIOSYNC_PASSPHRASE";

const CREDS_FILE: &str = "session.json.enc";

/// The persisted credential group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub is_data_admin: bool,
}

impl StoredSession {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            user_id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            is_data_admin: self.is_data_admin,
        }
    }
}

/// Encrypted key/value blob store for the active session
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    passphrase: String,
}

impl CredentialStore {
    /// Open the store in the default auth directory, taking the passphrase
    /// from the environment or prompting for it.
    pub fn open(data_paths: &DataPaths) -> Result<Self> {
        let auth_dir = data_paths.auth();
        std::fs::create_dir_all(&auth_dir)?;
        let passphrase = get_passphrase()?;
        Ok(Self {
            path: auth_dir.join(CREDS_FILE),
            passphrase,
        })
    }

    /// Open the store at an explicit path with an explicit passphrase.
    pub fn with_passphrase(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: passphrase.into(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Persist the full credential group, replacing any prior contents.
    pub fn save(&self, session: &StoredSession) -> Result<()> {
        let json = serde_json::to_vec(session)?;

        let mut salt = [0u8; 16];
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = derive_key(&self.passphrase, &salt)?;
        let cipher = Aes256Gcm::new(&key);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, json.as_slice())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        // salt + nonce + ciphertext
        let mut output = Vec::with_capacity(28 + ciphertext.len());
        output.extend_from_slice(&salt);
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);

        // Write-then-rename so a crash mid-write never leaves a torn blob
        let tmp = self.path.with_extension("enc.tmp");
        std::fs::write(&tmp, output)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Load the credential group, or `None` when nothing is persisted.
    pub fn load(&self) -> Result<Option<StoredSession>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let encrypted = std::fs::read(&self.path)?;
        if encrypted.len() < 28 {
            // 16 (salt) + 12 (nonce) = 28
            return Err(anyhow!("Invalid encrypted file format"));
        }

        let salt = &encrypted[..16];
        let nonce_bytes = &encrypted[16..28];
        let ciphertext = &encrypted[28..];

        let key = derive_key(&self.passphrase, salt)?;
        let cipher = Aes256Gcm::new(&key);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow!("Decryption failed. Wrong passphrase?"))?;

        let stored: StoredSession = serde_json::from_slice(&plaintext)?;
        Ok(Some(stored))
    }

    /// Remove the whole credential group. Removing the single blob clears
    /// every key at once; absence of the file is not an error.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// Get or prompt for passphrase
fn get_passphrase() -> Result<String> {
    if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
        return Ok(passphrase);
    }

    let passphrase = rpassword::prompt_password("Enter passphrase for credential encryption: ")?;
    if passphrase.is_empty() {
        return Err(anyhow!("Passphrase cannot be empty"));
    }
    Ok(passphrase)
}

/// Derive encryption key from passphrase
fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Key<Aes256Gcm>> {
    let mut key_bytes = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key_bytes)
        .map_err(|e| anyhow!("Failed to derive key: {}", e))?;
    Ok(*Key::<Aes256Gcm>::from_slice(&key_bytes))
}
