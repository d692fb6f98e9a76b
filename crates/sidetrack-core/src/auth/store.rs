//! Durable storage for the session record.
//!
//! The session is a single small record, so every backend stores it whole.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credentials::{self, KeyringStore};
use super::SessionData;

/// Session file name in the cache directory
const SESSION_FILE: &str = "session.json";

/// Encrypted session file name in the cache directory
const SEALED_SESSION_FILE: &str = "session.sealed";

/// ChaCha20-Poly1305 nonce length in bytes
const NONCE_LEN: usize = 12;

pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionData>>;
    fn save(&self, data: &SessionData) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Which store backs the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Plain JSON file in the cache directory.
    #[default]
    File,
    /// JSON file encrypted with a key held in the OS keychain.
    Sealed,
    /// The whole record in the OS keychain.
    Keyring,
    /// Nothing survives the process.
    Memory,
}

impl SessionBackend {
    /// Open the store for this backend. File-based backends live in `dir`.
    pub fn open(self, dir: &Path) -> Result<Arc<dyn SessionStore>> {
        let store: Arc<dyn SessionStore> = match self {
            SessionBackend::File => Arc::new(FileStore::new(dir.join(SESSION_FILE))),
            SessionBackend::Sealed => Arc::new(SealedFileStore::from_keychain(
                dir.join(SEALED_SESSION_FILE),
            )?),
            SessionBackend::Keyring => Arc::new(KeyringStore::new(credentials::SESSION_ACCOUNT)),
            SessionBackend::Memory => Arc::new(MemoryStore::default()),
        };
        debug!(backend = %self, "Session store opened");
        Ok(store)
    }
}

impl fmt::Display for SessionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionBackend::File => write!(f, "file"),
            SessionBackend::Sealed => write!(f, "sealed"),
            SessionBackend::Keyring => write!(f, "keyring"),
            SessionBackend::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for SessionBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(SessionBackend::File),
            "sealed" => Ok(SessionBackend::Sealed),
            "keyring" | "keychain" => Ok(SessionBackend::Keyring),
            "memory" => Ok(SessionBackend::Memory),
            other => bail!("Unknown session backend: {}", other),
        }
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn remove_file(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Plain JSON file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Result<Option<SessionData>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        let data = serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(data))
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let contents = serde_json::to_string_pretty(data)?;
        write_file(&self.path, contents.as_bytes())
    }

    fn clear(&self) -> Result<()> {
        remove_file(&self.path)
    }
}

/// JSON file sealed with ChaCha20-Poly1305. Layout: `nonce || ciphertext`.
pub struct SealedFileStore {
    path: PathBuf,
    cipher: ChaCha20Poly1305,
}

impl SealedFileStore {
    pub fn with_key(path: PathBuf, key: [u8; 32]) -> Self {
        Self {
            path,
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Use the session key from the OS keychain, creating it on first use.
    pub fn from_keychain(path: PathBuf) -> Result<Self> {
        let key = credentials::session_key()?;
        Ok(Self::with_key(path, key))
    }
}

impl SessionStore for SealedFileStore {
    fn load(&self) -> Result<Option<SessionData>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let sealed = std::fs::read(&self.path).context("Failed to read sealed session file")?;
        if sealed.len() <= NONCE_LEN {
            bail!("Sealed session file is truncated");
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow::anyhow!("Failed to decrypt session file"))?;
        let data = serde_json::from_slice(&plaintext).context("Failed to parse session file")?;
        Ok(Some(data))
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let plaintext = serde_json::to_vec(data)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| anyhow::anyhow!("Failed to encrypt session"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        write_file(&self.path, &sealed)
    }

    fn clear(&self) -> Result<()> {
        remove_file(&self.path)
    }
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Option<SessionData>>,
}

impl MemoryStore {
    pub fn with_data(data: SessionData) -> Self {
        Self {
            data: Mutex::new(Some(data)),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<SessionData>> {
        Ok(self.data.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(data.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
