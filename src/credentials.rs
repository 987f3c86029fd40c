/// Credential persistence.
///
/// The client keeps exactly one durable value: the bearer token, stored under
/// the fixed key `auth-token` in `~/.local/share/todosync/credentials.json`.
/// A write is visible to the next `get()` immediately, and login only counts
/// as successful after a read-after-write check (see `store_verified`).
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::CredentialError;

pub const CREDENTIAL_KEY: &str = "auth-token";

pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<String>, CredentialError>;
    fn set(&self, token: &str) -> Result<(), CredentialError>;
    fn clear(&self) -> Result<(), CredentialError>;
}

/// Persist `token`, then read it back. Anything other than the same token
/// coming back means the credential is not durable.
pub fn store_verified(store: &dyn CredentialStore, token: &str) -> Result<(), CredentialError> {
    store.set(token)?;
    match store.get()? {
        Some(saved) if saved == token => Ok(()),
        _ => Err(CredentialError::NotDurable),
    }
}

// ── File store ────────────────────────────────────────────────────────────────

pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_map(&self) -> Result<HashMap<String, String>, CredentialError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write via a sibling temp file + rename so a crash never leaves a
    /// half-written credential behind.
    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, serde_json::to_string_pretty(map)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.read_map()?.remove(CREDENTIAL_KEY))
    }

    fn set(&self, token: &str) -> Result<(), CredentialError> {
        let mut map = self.read_map().unwrap_or_default();
        map.insert(CREDENTIAL_KEY.to_string(), token.to_string());
        self.write_map(&map)
    }

    fn clear(&self) -> Result<(), CredentialError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

/// Process-lifetime store, used by `--ephemeral` and in tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.token.lock().map(|t| t.clone()).unwrap_or(None))
    }

    fn set(&self, token: &str) -> Result<(), CredentialError> {
        if let Ok(mut slot) = self.token.lock() {
            *slot = Some(token.to_string());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        if let Ok(mut slot) = self.token.lock() {
            *slot = None;
        }
        Ok(())
    }
}
