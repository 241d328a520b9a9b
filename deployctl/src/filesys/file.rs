//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::errors::DeployError;
use crate::utils::generate_uuid;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, DeployError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file contents, treating a missing file as empty
    pub async fn read_string_or_empty(&self) -> Result<String, DeployError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, DeployError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Replace the file contents atomically.
    ///
    /// The new contents are written to a sibling temp file which is then
    /// renamed over the target, so readers see either the old or the new
    /// file. The temp file is removed on every failure path.
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), DeployError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).await?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let guard = TempGuard::new(dir.join(format!(".{}.{}.tmp", file_name, generate_uuid())));

        let mut file = fs::File::create(guard.path()).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        // keep the permissions of the file being replaced (.env holds secrets)
        if let Ok(meta) = fs::metadata(&self.path).await {
            fs::set_permissions(guard.path(), meta.permissions()).await?;
        }

        fs::rename(guard.path(), &self.path).await?;
        guard.disarm();
        Ok(())
    }
}

/// Removes a temp file on drop unless disarmed
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("Removing leftover temp file: {}", self.path.display());
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
