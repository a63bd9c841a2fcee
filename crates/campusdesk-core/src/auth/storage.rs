//! Durable storage for the credential pair.
//!
//! Exactly one entry is kept. It is read at startup and whenever the token
//! store has nothing in memory, written on every new credential and removed
//! on every clear.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use keyring::Entry;

use super::credential::Credential;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

const KEYRING_SERVICE: &str = "campusdesk";

/// Keychain account under which the serialized credential is stored.
const KEYRING_ACCOUNT: &str = "session";

pub trait CredentialStorage: Send + Sync {
    /// `Ok(None)` when nothing is stored; `Err` when the entry exists but
    /// cannot be read or parsed.
    fn load(&self) -> Result<Option<Credential>>;

    fn save(&self, credential: &Credential) -> Result<()>;

    /// Removing an absent entry is not an error.
    fn remove(&self) -> Result<()>;
}

impl<T: CredentialStorage + ?Sized> CredentialStorage for Arc<T> {
    fn load(&self) -> Result<Option<Credential>> {
        (**self).load()
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        (**self).save(credential)
    }

    fn remove(&self) -> Result<()> {
        (**self).remove()
    }
}

/// One JSON file under the cache directory.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: cache_dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl CredentialStorage for FileStorage {
    fn load(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        let credential =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(credential)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// The OS keychain, one entry holding the serialized credential.
///
/// The entry is resolved once, so every load sees what the last save wrote
/// even on backends that keep nothing between separate entries.
pub struct KeyringStorage {
    entry: Entry,
}

impl KeyringStorage {
    pub fn new() -> Result<Self> {
        Self::for_service(KEYRING_SERVICE)
    }

    pub fn for_service(service: &str) -> Result<Self> {
        let entry = Entry::new(service, KEYRING_ACCOUNT).context("Failed to create keyring entry")?;
        Ok(Self { entry })
    }
}

impl CredentialStorage for KeyringStorage {
    fn load(&self) -> Result<Option<Credential>> {
        let contents = match self.entry.get_password() {
            Ok(contents) => contents,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(e).context("Failed to read credential from keychain"),
        };
        let credential =
            serde_json::from_str(&contents).context("Failed to parse keychain credential")?;
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let contents = serde_json::to_string(credential)?;
        self.entry
            .set_password(&contents)
            .context("Failed to store credential in keychain")?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

/// Process-local storage. Holds raw text so that malformed entries can be
/// simulated.
#[derive(Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the slot with arbitrary text.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl CredentialStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Credential>> {
        match self.raw() {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context("Failed to parse stored credential")?,
            )),
            None => Ok(None),
        }
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let raw = serde_json::to_string(credential)?;
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(raw);
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
