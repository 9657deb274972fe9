//! Secret store adapters.
//!
//! The backend never sees raw key material beyond resolving an opaque
//! reference at construction time, and never logs it. OS keychain
//! integration stays behind this trait; the built-in adapters cover
//! environment variables and a locked-down file directory.

use crate::config::{SecretBackend, SecretsConfig};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors from secret store operations.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret store denied the operation: {0}")]
    Denied(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid secret reference '{0}'")]
    InvalidRef(String),
}

/// Narrow interface to wherever secrets actually live.
pub trait SecretStore: Send + Sync {
    /// Resolve a reference. `Ok(None)` means the ref does not exist.
    fn get(&self, key_ref: &str) -> Result<Option<Vec<u8>>, SecretStoreError>;

    /// Store a secret under a reference.
    fn put(&self, key_ref: &str, value: &[u8]) -> Result<(), SecretStoreError>;
}

/// Build the configured store.
pub fn from_config(config: &SecretsConfig) -> Result<Arc<dyn SecretStore>, SecretStoreError> {
    match config.backend {
        SecretBackend::Env => Ok(Arc::new(EnvSecretStore)),
        SecretBackend::File => {
            let dir = config.dir.clone().ok_or_else(|| {
                SecretStoreError::InvalidRef("secrets.dir is required for the file backend".into())
            })?;
            Ok(Arc::new(FileSecretStore::new(PathBuf::from(dir))))
        }
    }
}

/// Refs are environment variable names. Read-only.
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, key_ref: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        match std::env::var(key_ref) {
            Ok(value) => Ok(Some(value.into_bytes())),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => {
                Err(SecretStoreError::InvalidRef(key_ref.to_string()))
            }
        }
    }

    fn put(&self, _key_ref: &str, _value: &[u8]) -> Result<(), SecretStoreError> {
        Err(SecretStoreError::Denied(
            "environment variables are read-only".to_string(),
        ))
    }
}

/// Refs are file names under a directory; files are written 0600.
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Refs must be plain names; anything path-like is rejected.
    fn path_for(&self, key_ref: &str) -> Result<PathBuf, SecretStoreError> {
        if key_ref.is_empty()
            || key_ref.contains('/')
            || key_ref.contains('\\')
            || key_ref.contains("..")
        {
            return Err(SecretStoreError::InvalidRef(key_ref.to_string()));
        }
        Ok(self.dir.join(key_ref))
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key_ref: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        let path = self.path_for(key_ref)?;
        match std::fs::read(&path) {
            Ok(mut bytes) => {
                // Tolerate a trailing newline from hand-written key files.
                while bytes.last() == Some(&b'\n') || bytes.last() == Some(&b'\r') {
                    bytes.pop();
                }
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(SecretStoreError::Denied(path.display().to_string()))
            }
            Err(e) => Err(SecretStoreError::Io(e)),
        }
    }

    fn put(&self, key_ref: &str, value: &[u8]) -> Result<(), SecretStoreError> {
        let path = self.path_for(key_ref)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, value)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(key_ref: &str, value: &[u8]) -> Self {
        let store = Self::new();
        store.entries.insert(key_ref.to_string(), value.to_vec());
        store
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key_ref: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        Ok(self.entries.get(key_ref).map(|e| e.value().clone()))
    }

    fn put(&self, key_ref: &str, value: &[u8]) -> Result<(), SecretStoreError> {
        self.entries.insert(key_ref.to_string(), value.to_vec());
        Ok(())
    }
}
