use anyhow::{bail, Context, Result};
use keyring::Entry;
use rand::RngCore;

use super::store::SessionStore;
use super::SessionData;

const SERVICE_NAME: &str = "sidetrack";

/// Keychain account holding the serialized session.
pub const SESSION_ACCOUNT: &str = "session";

/// Keychain account holding the key for the sealed session file.
const SESSION_KEY_ACCOUNT: &str = "session-key";

fn entry(account: &str) -> Result<Entry> {
    Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")
}

/// Session record kept in the OS keychain.
pub struct KeyringStore {
    account: String,
}

impl KeyringStore {
    pub fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
        }
    }
}

impl SessionStore for KeyringStore {
    fn load(&self) -> Result<Option<SessionData>> {
        match entry(&self.account)?.get_password() {
            Ok(contents) => {
                let data = serde_json::from_str(&contents)
                    .context("Failed to parse session from keychain")?;
                Ok(Some(data))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read session from keychain"),
        }
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let contents = serde_json::to_string(data)?;
        entry(&self.account)?
            .set_password(&contents)
            .context("Failed to store session in keychain")
    }

    fn clear(&self) -> Result<()> {
        match entry(&self.account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_key(hex: &str) -> Result<[u8; 32]> {
    if hex.len() != 64 || !hex.is_ascii() {
        bail!("Stored session key has the wrong length");
    }
    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .context("Stored session key is not hex")?;
    }
    Ok(key)
}

/// Key for the sealed session file, generated and stored on first use.
pub fn session_key() -> Result<[u8; 32]> {
    let entry = entry(SESSION_KEY_ACCOUNT)?;
    match entry.get_password() {
        Ok(hex) => decode_key(&hex),
        Err(keyring::Error::NoEntry) => {
            let mut key = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            entry
                .set_password(&encode_hex(&key))
                .context("Failed to store session key in keychain")?;
            Ok(key)
        }
        Err(e) => Err(e).context("Failed to read session key from keychain"),
    }
}
