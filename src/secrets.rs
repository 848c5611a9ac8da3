use crate::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Mutex;

pub const KEYRING_SERVICE: &str = "ball-planner";
pub const GEMINI_KEY_ACCOUNT: &str = "gemini-api-key";

/// Credential storage. The keyring is the default, tests swap in memory.
pub trait SecretStore: Send + Sync {
    fn get(&self, account: &str) -> AppResult<Option<String>>;
    fn set(&self, account: &str, secret: &str) -> AppResult<()>;
    fn clear(&self, account: &str) -> AppResult<()>;
}

#[derive(Debug)]
pub struct KeyringSecrets {
    service: String,
    lock: Mutex<()>,
}

impl KeyringSecrets {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            lock: Mutex::new(()),
        }
    }

    fn entry(&self, account: &str) -> AppResult<keyring::Entry> {
        keyring::Entry::new(&self.service, account).map_err(|error| AppError::Io(error.to_string()))
    }

    fn guard(&self) -> AppResult<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| AppError::Internal("keyring mutex poisoned".to_string()))
    }
}

impl Default for KeyringSecrets {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl SecretStore for KeyringSecrets {
    fn get(&self, account: &str) -> AppResult<Option<String>> {
        let _guard = self.guard()?;
        match self.entry(account)?.get_password() {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }

    fn set(&self, account: &str, secret: &str) -> AppResult<()> {
        if secret.trim().is_empty() {
            return Err(AppError::InvalidInput("Secret cannot be empty".to_string()));
        }
        let _guard = self.guard()?;
        self.entry(account)?
            .set_password(secret)
            .map_err(|error| AppError::Io(error.to_string()))
    }

    fn clear(&self, account: &str) -> AppResult<()> {
        let _guard = self.guard()?;
        match self.entry(account)?.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySecrets {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| AppError::Internal("memory secrets mutex poisoned".to_string()))
    }
}

impl SecretStore for MemorySecrets {
    fn get(&self, account: &str) -> AppResult<Option<String>> {
        Ok(self.values()?.get(account).cloned())
    }

    fn set(&self, account: &str, secret: &str) -> AppResult<()> {
        if secret.trim().is_empty() {
            return Err(AppError::InvalidInput("Secret cannot be empty".to_string()));
        }
        self.values()?.insert(account.to_string(), secret.to_string());
        Ok(())
    }

    fn clear(&self, account: &str) -> AppResult<()> {
        self.values()?.remove(account);
        Ok(())
    }
}

/// Hosted API key management exposed to the GUI shell.
pub struct Credentials<'a> {
    store: &'a dyn SecretStore,
}

impl<'a> Credentials<'a> {
    pub fn new(store: &'a dyn SecretStore) -> Self {
        Self { store }
    }

    pub fn save_gemini_key(&self, key: &str) -> AppResult<()> {
        self.store.set(GEMINI_KEY_ACCOUNT, key.trim())
    }

    pub fn clear_gemini_key(&self) -> AppResult<()> {
        self.store.clear(GEMINI_KEY_ACCOUNT)
    }

    pub fn has_gemini_key(&self) -> AppResult<bool> {
        Ok(self.store.get(GEMINI_KEY_ACCOUNT)?.is_some())
    }

    pub fn gemini_key(&self) -> AppResult<Option<String>> {
        self.store.get(GEMINI_KEY_ACCOUNT)
    }
}
