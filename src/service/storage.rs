use crate::{RelayError, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use uuid::Uuid;

/// Disk sink for stored files.
///
/// Every store gets a fresh name combining a millisecond timestamp and a
/// UUID, so two concurrent stores of the same type never collide on one
/// destination.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            RelayError::Storage(format!(
                "Failed to create storage dir {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `content` under a unique name derived from `file_type`.
    pub async fn store(&self, file_name: &str, file_type: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.root.join(Self::unique_name(file_type));
        tokio::fs::write(&path, content).await.map_err(|e| {
            RelayError::Storage(format!("Failed to write {}: {}", path.display(), e))
        })?;
        info!(
            "Stored {} ({} bytes) as {}",
            file_name,
            content.len(),
            path.display()
        );
        Ok(path)
    }

    fn unique_name(file_type: &str) -> String {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let tag = Uuid::new_v4().simple();
        // The extension comes off the wire; keep it path-safe.
        let ext: String = file_type
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(16)
            .collect();
        if ext.is_empty() {
            format!("received_{}_{}", stamp, tag)
        } else {
            format!("received_{}_{}.{}", stamp, tag, ext)
        }
    }
}
