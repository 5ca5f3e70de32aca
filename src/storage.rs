//! Local persisted client state: the stored backend session.

use std::path::PathBuf;
use std::sync::Mutex;

use tokio::io::AsyncWriteExt;

use crate::error::SessionError;
use crate::types::Session;

/// Where the backend client keeps the signed-in session between runs.
#[async_trait::async_trait]
pub trait SessionStorage: Send + Sync {
    async fn load(&self) -> Result<Option<Session>, SessionError>;
    async fn save(&self, session: &Session) -> Result<(), SessionError>;
    async fn clear(&self) -> Result<(), SessionError>;
}

// =============================================================================
// MEMORY
// =============================================================================

/// Process-local storage; forgotten on exit.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    session: Mutex<Option<Session>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStorage for MemoryStorage {
    async fn load(&self) -> Result<Option<Session>, SessionError> {
        Ok(self
            .session
            .lock()
            .map_err(|e| SessionError::Storage(e.to_string()))?
            .clone())
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        *self
            .session
            .lock()
            .map_err(|e| SessionError::Storage(e.to_string()))? = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        *self
            .session
            .lock()
            .map_err(|e| SessionError::Storage(e.to_string()))? = None;
        Ok(())
    }
}

// =============================================================================
// FILE
// =============================================================================

/// JSON file storage. A missing file means "no session"; an unreadable one
/// is reported so the caller can decide to clear it.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl SessionStorage for FileStorage {
    async fn load(&self) -> Result<Option<Session>, SessionError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SessionError::Storage(e.to_string())),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| SessionError::Storage(format!("{}: {e}", self.path.display())))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::Storage(e.to_string()))?;
        }
        let json = serde_json::to_string(session).map_err(|e| SessionError::Storage(e.to_string()))?;

        // Tokens are credentials: owner-only file, swapped in by rename.
        let tmp = self.tmp_path();
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&tmp)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))
    }

    async fn clear(&self) -> Result<(), SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
