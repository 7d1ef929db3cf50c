//! Durable token storage
//!
//! The web front end kept the bearer token in `localStorage`; here a
//! single JSON file under the config directory plays that role. Only
//! the tokens and the username are written, never a password.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Credentials persisted between runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Bearer token attached to API requests
    pub access_token: String,
    /// Token accepted by the refresh endpoint
    #[serde(default)]
    pub refresh_token: String,
    /// Last logged-in username, for prompt prefill
    #[serde(default)]
    pub username: String,
}

/// File-backed token store
///
/// Written by login/logout only; read once at start-up.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a token store under the default config directory
    pub fn new() -> Self {
        let dir = dirs::home_dir()
            .map(|h| h.join(".psyas"))
            .unwrap_or_else(|| PathBuf::from(".psyas"));
        Self::with_dir(dir)
    }

    /// Create a token store under a custom directory
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join("credentials.json"),
        }
    }

    /// Load persisted credentials, if any
    ///
    /// A missing or unreadable file yields `None`; corruption is logged
    /// and treated as logged-out rather than failing start-up.
    pub fn load(&self) -> Option<StoredCredentials> {
        if !self.path.exists() {
            return None;
        }
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<StoredCredentials>(&content) {
            Ok(creds) if !creds.access_token.is_empty() => Some(creds),
            Ok(_) => None,
            Err(e) => {
                warn!("ignoring corrupt credentials file: {}", e);
                None
            }
        }
    }

    /// Persist credentials, replacing any previous contents
    pub fn save(&self, creds: &StoredCredentials) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(creds)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Remove the persisted credentials
    pub fn clear(&self) -> crate::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = TokenStore::with_dir(temp_dir.path());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = TokenStore::with_dir(temp_dir.path());

        store
            .save(&StoredCredentials {
                access_token: "tok".to_string(),
                refresh_token: "ref".to_string(),
                username: "alice".to_string(),
            })
            .unwrap();

        let creds = store.load().unwrap();
        assert_eq!(creds.access_token, "tok");
        assert_eq!(creds.refresh_token, "ref");
        assert_eq!(creds.username, "alice");
    }

    #[test]
    fn test_clear_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = TokenStore::with_dir(temp_dir.path());

        store
            .save(&StoredCredentials {
                access_token: "tok".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.load().is_some());

        store.clear().unwrap();
        assert!(store.load().is_none());
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_treated_as_logged_out() {
        let temp_dir = TempDir::new().unwrap();
        let store = TokenStore::with_dir(temp_dir.path());

        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_empty_token_treated_as_logged_out() {
        let temp_dir = TempDir::new().unwrap();
        let store = TokenStore::with_dir(temp_dir.path());

        store.save(&StoredCredentials::default()).unwrap();
        assert!(store.load().is_none());
    }
}
