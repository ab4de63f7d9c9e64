//! Document storage seam and its filesystem implementation.

use async_trait::async_trait;

use geonote_shared::{Document, GeonoteError, Result};

/// Reads and writes whole documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the full text of `document`.
    async fn read(&self, document: &Document) -> Result<String>;

    /// Replace the full text of `document` with `content`.
    async fn write(&self, document: &Document, content: &str) -> Result<()>;
}

/// [`DocumentStore`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

#[async_trait]
impl DocumentStore for FsStore {
    async fn read(&self, document: &Document) -> Result<String> {
        tokio::fs::read_to_string(document.path())
            .await
            .map_err(|e| GeonoteError::io(document.path(), e))
    }

    async fn write(&self, document: &Document, content: &str) -> Result<()> {
        tokio::fs::write(document.path(), content)
            .await
            .map_err(|e| GeonoteError::io(document.path(), e))
    }
}
