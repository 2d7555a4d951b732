use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::artifact::{artifact_key, ArtifactError, ArtifactStore};

/// In-memory artifact store for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a file inside a location, as a job would
    pub async fn insert(
        &self,
        location: &str,
        relative_path: &str,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<(), ArtifactError> {
        let key = artifact_key(location, relative_path)?;
        self.files.write().await.insert(key, bytes.into());
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn get(&self, location: &str, relative_path: &str) -> Result<Vec<u8>, ArtifactError> {
        let key = artifact_key(location, relative_path)?;
        self.files
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(ArtifactError::NotFound(key))
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<String, ArtifactError> {
        let location = format!("blobs/{}", Uuid::new_v4());
        self.files.write().await.insert(location.clone(), bytes);
        Ok(location)
    }
}
