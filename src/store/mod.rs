//! Durable per-session credentials.
//!
//! Layout: one subdirectory per session under the configured session root,
//! holding `creds.json`. Credential files are mode 0600, directories 0755,
//! and every write goes through a temp file plus rename so a crash never
//! leaves a half-written document.

pub mod error;

pub use error::{Result, StoreError};

use rand::rngs::OsRng;
use rand::TryRngCore;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::crypto::key_pair::KeyPair;

const CREDS_FILE: &str = "creds.json";

/// The account that authorised this session at pairing time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub name: String,
}

/// Long-lived keys and identifiers derived at first pairing. A session that
/// persists these can resume without a new QR exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub noise_key: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: KeyPair,
    pub registration_id: u32,
    #[serde(with = "serde_bytes")]
    pub adv_secret_key: Vec<u8>,
    pub me: Owner,
}

impl Credentials {
    /// Mints a fresh credential set around an existing static Noise key
    /// pair, once the pairing handshake has told us who the owner is.
    pub fn generate(noise_key: KeyPair, me: Owner) -> Self {
        let mut adv_secret_key = vec![0u8; 32];
        OsRng
            .try_fill_bytes(&mut adv_secret_key)
            .expect("RNG failure");
        let mut reg_bytes = [0u8; 4];
        OsRng.try_fill_bytes(&mut reg_bytes).expect("RNG failure");

        Self {
            noise_key,
            signed_identity_key: KeyPair::new(),
            signed_pre_key: KeyPair::new(),
            // Registration ids live in the 14-bit space the protocol allots.
            registration_id: u32::from_be_bytes(reg_bytes) % 16380 + 1,
            adv_secret_key,
            me,
        }
    }
}

/// Filesystem-backed credential store rooted at the session directory.
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub async fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        set_dir_mode(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn creds_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(CREDS_FILE)
    }

    pub async fn has_credentials(&self, session_id: &str) -> bool {
        fs::try_exists(self.creds_path(session_id))
            .await
            .unwrap_or(false)
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<Credentials>> {
        match fs::read(self.creds_path(session_id)).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    pub async fn save(&self, session_id: &str, creds: &Credentials) -> Result<()> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;
        set_dir_mode(&dir).await?;

        let data = serde_json::to_vec_pretty(creds)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let path = self.creds_path(session_id);
        let tmp_path = dir.join(format!("{CREDS_FILE}.tmp"));
        fs::write(&tmp_path, &data).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    /// Removes a session's directory and everything in it.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        match fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Session ids that have a credentials file on disk.
    pub async fn list_persisted(&self) -> Result<Vec<String>> {
        let mut sessions = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(StoreError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str() {
                if self.has_credentials(id).await {
                    sessions.push(id.to_string());
                }
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}

async fn set_dir_mode(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
