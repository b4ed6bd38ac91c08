// OS keyring storage for the credential store. One keyring entry per key
// under a fixed service name.

use std::io;

use homedash_core::StorageBackend;

#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> io::Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key).map_err(io::Error::other)
    }
}

impl StorageBackend for KeyringBackend {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.entry(key)?
            .set_password(value)
            .map_err(io::Error::other)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}
