// ── Credential store ──
//
// Persists the hub credentials and the last-known hub address between
// sessions. Storage is pluggable (`StorageBackend`): a directory of files
// for the CLI, an in-memory map for tests and embedders, and the OS
// keyring (in homedash-config). Reads never fail: missing, corrupt, or
// expired records read as absent.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use homedash_api::Credentials;
use tracing::{debug, warn};
use url::Url;

use crate::error::CoreError;

/// Storage key of the credential record.
pub const TOKENS_KEY: &str = "hassTokens";

/// Storage key of the last-known hub address.
pub const HUB_URL_KEY: &str = "hassUrl";

// ── Storage backends ─────────────────────────────────────────────────

/// String key/value storage the credential store sits on.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &path)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match std::fs::remove_file(self.path(key)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

// ── CredentialStore ──────────────────────────────────────────────────

pub trait CredentialStore: Send + Sync {
    /// Stored credentials, or `None` if absent, unreadable, or expired.
    fn load(&self) -> Option<Credentials>;

    /// Persist `credentials` and their hub address.
    fn save(&self, credentials: &Credentials) -> Result<(), CoreError>;

    /// Last persisted hub address, if readable.
    fn load_hub_url(&self) -> Option<Url>;

    /// Forget credentials and hub address.
    fn clear(&self) -> Result<(), CoreError>;
}

/// [`CredentialStore`] over any [`StorageBackend`], using the
/// `hassTokens` / `hassUrl` keys.
#[derive(Debug, Default)]
pub struct KeyedCredentialStore<B> {
    backend: B,
}

impl<B: StorageBackend> KeyedCredentialStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "credential storage unreadable");
                None
            }
        }
    }
}

fn storage_error(e: &io::Error) -> CoreError {
    CoreError::Storage {
        message: e.to_string(),
    }
}

impl<B: StorageBackend> CredentialStore for KeyedCredentialStore<B> {
    fn load(&self) -> Option<Credentials> {
        let raw = self.read(TOKENS_KEY)?;
        let credentials: Credentials = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "stored credentials are corrupt, ignoring");
                return None;
            }
        };

        if credentials.is_expired() {
            debug!(expires_at = %credentials.expires_at, "stored credentials expired");
            return None;
        }
        Some(credentials)
    }

    fn save(&self, credentials: &Credentials) -> Result<(), CoreError> {
        let json = serde_json::to_string(credentials)
            .map_err(|e| CoreError::Internal(format!("cannot serialize credentials: {e}")))?;
        self.backend
            .set(TOKENS_KEY, &json)
            .map_err(|e| storage_error(&e))?;
        self.backend
            .set(HUB_URL_KEY, credentials.hub_url.as_str())
            .map_err(|e| storage_error(&e))?;
        debug!(hub_url = %credentials.hub_url, "credentials saved");
        Ok(())
    }

    fn load_hub_url(&self) -> Option<Url> {
        let raw = self.read(HUB_URL_KEY)?;
        match Url::parse(raw.trim()) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, "stored hub address is corrupt, ignoring");
                None
            }
        }
    }

    fn clear(&self) -> Result<(), CoreError> {
        self.backend
            .remove(TOKENS_KEY)
            .map_err(|e| storage_error(&e))?;
        self.backend
            .remove(HUB_URL_KEY)
            .map_err(|e| storage_error(&e))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
