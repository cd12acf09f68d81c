use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::SinkError;

/// Opaque handle returned by [`BlobStore::put`], sufficient to retrieve the
/// same bytes later via [`BlobStore::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator(pub String);

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn put(&self, locator_hint: &str, bytes: &[u8]) -> Result<Locator, SinkError>;
    async fn get(&self, locator: &Locator) -> Result<Vec<u8>, SinkError>;
}

/// Local-filesystem blob store — the trivial backend appropriate for a
/// reference implementation. Object-store/HTTP-origin backends are out of
/// scope; `BlobStore` exists as the seam for them.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, locator_hint: &str) -> PathBuf {
        // Drop path separators from the hint; it's a label, not a path.
        let sanitized: String = locator_hint
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.root.join(sanitized)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, locator_hint: &str, bytes: &[u8]) -> Result<Locator, SinkError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(locator_hint);
        tokio::fs::write(&path, bytes).await?;
        Ok(Locator(path.display().to_string()))
    }

    async fn get(&self, locator: &Locator) -> Result<Vec<u8>, SinkError> {
        tokio::fs::read(&locator.0)
            .await
            .map_err(|_| SinkError::NotFound(locator.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let locator = store.put("job-1/artifact.tar.gz", b"payload").await.unwrap();
        assert_eq!(store.get(&locator).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn missing_locator_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let missing = Locator(dir.path().join("nope").display().to_string());
        assert!(matches!(store.get(&missing).await, Err(SinkError::NotFound(_))));
    }
}
