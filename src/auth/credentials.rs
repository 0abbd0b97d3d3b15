//! Identity token storage.
//!
//! Stores the identity token in the OS keychain when available, with a
//! JSON file fallback for systems where the keychain is not
//! accessible.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use super::{KEYRING_SERVICE, KEYRING_TOKEN_USER};
use crate::api::DEFAULT_API_URL;

/// Stored identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// The identity token for authenticating with the backend.
    pub api_token: String,

    /// User name, once the token is linked to an account.
    pub user_name: Option<String>,

    /// Backend URL the token was minted against.
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

/// Errors from credential storage.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("Credentials file error: {0}")]
    File(String),
}

/// Credential storage abstraction.
///
/// Uses the OS keychain when available, with a fallback to a JSON
/// file under the pulse config directory.
pub struct CredentialsStore {
    /// Whether keyring is available on this system.
    keyring_available: bool,
    /// Where the file fallback lives.
    fallback_path: PathBuf,
}

impl CredentialsStore {
    /// Creates a store, detecting whether the OS keychain works.
    pub fn new() -> Self {
        Self::with_keychain(true)
    }

    /// Creates a store with keychain use gated by configuration.
    pub fn with_keychain(use_keychain: bool) -> Self {
        Self {
            keyring_available: use_keychain && Self::test_keyring_available(),
            fallback_path: default_fallback_path(),
        }
    }

    /// Creates a file-only store at an explicit path.
    #[allow(dead_code)]
    pub fn file_only(path: impl Into<PathBuf>) -> Self {
        Self {
            keyring_available: false,
            fallback_path: path.into(),
        }
    }

    /// Tests whether the keyring works by attempting a dummy lookup.
    fn test_keyring_available() -> bool {
        match Entry::new(KEYRING_SERVICE, "test-availability") {
            Ok(entry) => match entry.get_password() {
                Ok(_) => true,
                Err(keyring::Error::NoEntry) => true,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    /// Stores credentials, preferring the keychain.
    pub fn store(&self, credentials: &Credentials) -> Result<(), CredentialsError> {
        if self.keyring_available {
            self.store_to_keyring(credentials)
        } else {
            self.store_to_file(credentials)
        }
    }

    /// Loads stored credentials, checking the keychain first.
    pub fn load(&self) -> Result<Option<Credentials>, CredentialsError> {
        if self.keyring_available {
            if let Some(creds) = self.load_from_keyring()? {
                return Ok(Some(creds));
            }
        }

        self.load_from_file()
    }

    /// Deletes credentials from both keychain and file storage.
    pub fn delete(&self) -> Result<(), CredentialsError> {
        if self.keyring_available {
            self.delete_from_keyring()?;
        }

        self.delete_from_file()?;

        Ok(())
    }

    // ==================== Keyring operations ====================

    fn store_to_keyring(&self, credentials: &Credentials) -> Result<(), CredentialsError> {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_USER)
            .map_err(|e| CredentialsError::Keychain(e.to_string()))?;

        // Store credentials as JSON
        let json = serde_json::to_string(credentials)
            .map_err(|e| CredentialsError::Keychain(format!("Serialization error: {e}")))?;

        entry
            .set_password(&json)
            .map_err(|e| CredentialsError::Keychain(e.to_string()))?;

        Ok(())
    }

    fn load_from_keyring(&self) -> Result<Option<Credentials>, CredentialsError> {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_USER)
            .map_err(|e| CredentialsError::Keychain(e.to_string()))?;

        match entry.get_password() {
            Ok(json) => {
                let credentials: Credentials = serde_json::from_str(&json)
                    .map_err(|e| CredentialsError::Keychain(format!("Deserialization error: {e}")))?;
                Ok(Some(credentials))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialsError::Keychain(e.to_string())),
        }
    }

    fn delete_from_keyring(&self) -> Result<(), CredentialsError> {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_USER)
            .map_err(|e| CredentialsError::Keychain(e.to_string()))?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
            Err(e) => Err(CredentialsError::Keychain(e.to_string())),
        }
    }

    // ==================== File operations ====================

    fn store_to_file(&self, credentials: &Credentials) -> Result<(), CredentialsError> {
        let path = &self.fallback_path;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CredentialsError::File(format!("Failed to create config directory: {e}"))
            })?;
        }

        let json = serde_json::to_string_pretty(credentials)
            .map_err(|e| CredentialsError::File(format!("Serialization error: {e}")))?;

        fs::write(path, json)
            .map_err(|e| CredentialsError::File(format!("Failed to write credentials file: {e}")))?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).map_err(|e| {
                CredentialsError::File(format!("Failed to set file permissions: {e}"))
            })?;
        }

        Ok(())
    }

    fn load_from_file(&self) -> Result<Option<Credentials>, CredentialsError> {
        let path = &self.fallback_path;

        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(path)
            .map_err(|e| CredentialsError::File(format!("Failed to read credentials file: {e}")))?;

        let credentials: Credentials = serde_json::from_str(&json)
            .map_err(|e| CredentialsError::File(format!("Invalid credentials file: {e}")))?;

        Ok(Some(credentials))
    }

    fn delete_from_file(&self) -> Result<(), CredentialsError> {
        let path = &self.fallback_path;

        if path.exists() {
            fs::remove_file(path).map_err(|e| {
                CredentialsError::File(format!("Failed to delete credentials file: {e}"))
            })?;
        }

        Ok(())
    }
}

impl Default for CredentialsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn default_fallback_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".pulse")
        .join("credentials.json")
}
