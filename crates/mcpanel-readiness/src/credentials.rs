use crate::ReadinessError;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::debug;

/// Holder of the backend session token.
///
/// The token is persisted to disk (when backed by a file) and replaced
/// atomically; subscribers are notified on every change.
pub struct CredentialStore {
    path: Option<PathBuf>,
    token: watch::Sender<Option<String>>,
}

impl CredentialStore {
    #[must_use]
    pub fn in_memory(token: Option<String>) -> Self {
        Self {
            path: None,
            token: watch::Sender::new(token),
        }
    }

    /// Open a file-backed store, reading any previously saved token.
    ///
    /// # Errors
    /// Returns `ReadinessError::Credentials` if an existing file cannot be read.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ReadinessError> {
        let path = path.into();
        let token = match std::fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        debug!(
            "Loaded credential store from {} (token present: {})",
            path.display(),
            token.is_some()
        );
        Ok(Self {
            path: Some(path),
            token: watch::Sender::new(token),
        })
    }

    /// Default token location under the user's config directory.
    ///
    /// # Errors
    /// Returns `ReadinessError::Directory` if no config directory exists.
    pub fn default_path() -> Result<PathBuf, ReadinessError> {
        let config = dirs::config_dir()
            .ok_or_else(|| ReadinessError::Directory("config directory not found".into()))?;
        Ok(config.join("mcpanel").join("token"))
    }

    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token.borrow().is_some()
    }

    /// Replace the token, persisting first so a failed write changes nothing.
    ///
    /// # Errors
    /// Returns `ReadinessError::Credentials` if the token file cannot be written.
    pub fn set(&self, token: impl Into<String>) -> Result<(), ReadinessError> {
        let token = token.into();
        if let Some(path) = &self.path {
            write_token_file(path, &token)?;
        }
        self.token.send_replace(Some(token));
        Ok(())
    }

    /// Forget the token.
    ///
    /// # Errors
    /// Returns `ReadinessError::Credentials` if the token file cannot be removed.
    pub fn clear(&self) -> Result<(), ReadinessError> {
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.token.send_replace(None);
        Ok(())
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.token.subscribe()
    }
}

fn write_token_file(path: &Path, token: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, token)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)
}
