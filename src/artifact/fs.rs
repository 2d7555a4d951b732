use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use crate::artifact::{artifact_key, ArtifactError, ArtifactStore};

/// Filesystem-based artifact store.
///
/// Every location is a path relative to `base_path`. Blobs written with
/// `put` land under `{base_path}/blobs/`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    base_path: PathBuf,
}

impl FsArtifactStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn get(&self, location: &str, relative_path: &str) -> Result<Vec<u8>, ArtifactError> {
        let key = artifact_key(location, relative_path)?;
        let path = self.base_path.join(&key);
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArtifactError::NotFound(key)
            } else {
                ArtifactError::Io(e)
            }
        })
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<String, ArtifactError> {
        let location = format!("blobs/{}", Uuid::new_v4());
        let path = self.base_path.join(&location);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;

        Ok(location)
    }
}
