//! Artifact storage
//!
//! Data jobs write their outputs to locations in an artifact store. The
//! driver reads property files back from the store when their producing
//! step succeeds. Locations are opaque strings owned by the store.

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;

use async_trait::async_trait;
use std::path::{Component, Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Artifact storage trait.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Read the file at `relative_path` inside `location`.
    ///
    /// An empty relative path addresses the location itself.
    async fn get(&self, location: &str, relative_path: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Store a blob and return its location
    async fn put(&self, bytes: Vec<u8>) -> Result<String, ArtifactError>;
}

/// Join a location and a relative path, refusing anything that escapes upward
pub(crate) fn artifact_key(location: &str, relative_path: &str) -> Result<String, ArtifactError> {
    let key = if relative_path.is_empty() {
        location.trim_end_matches('/').to_string()
    } else {
        format!(
            "{}/{}",
            location.trim_end_matches('/'),
            relative_path.trim_start_matches('/')
        )
    };

    let escapes = Path::new(&key)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if key.is_empty() || escapes {
        return Err(ArtifactError::InvalidPath(key));
    }

    Ok(key)
}
