//! Restricted sub-view of another storage.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;

use super::{InputStream, Storage, StorageMarker, StorageResult, normalize};

/// A storage that exposes one directory of an inner storage as its root.
///
/// Group folders and shared mounts are presented this way: callers see
/// paths relative to the jail root, while policy needs the absolute path
/// inside the inner storage. [`Storage::unjailed_path`] provides it.
pub struct JailedStorage<S: Storage + ?Sized> {
    inner: Arc<S>,
    root: String,
}

impl<S: Storage + ?Sized> JailedStorage<S> {
    /// Create a jail rooted at `root` inside `inner`.
    pub fn new(inner: Arc<S>, root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            inner,
            root: normalize(&root).to_string(),
        }
    }

    /// The jail root inside the inner storage.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Get a reference to the inner storage.
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    fn source_path(&self, path: &str) -> String {
        let path = normalize(path);
        match (self.root.is_empty(), path.is_empty()) {
            (true, _) => path.to_string(),
            (false, true) => self.root.clone(),
            (false, false) => format!("{}/{}", self.root, path),
        }
    }
}

impl<S: Storage + ?Sized> std::fmt::Debug for JailedStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JailedStorage")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: Storage + ?Sized + 'static> Storage for JailedStorage<S> {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.inner.read(&self.source_path(path)).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<u64> {
        self.inner.write(&self.source_path(path), data).await
    }

    async fn write_stream(
        &self,
        path: &str,
        stream: InputStream<'_>,
        size: Option<u64>,
    ) -> StorageResult<u64> {
        self.inner
            .write_stream(&self.source_path(path), stream, size)
            .await
    }

    async fn touch(&self, path: &str, mtime: Option<SystemTime>) -> StorageResult<()> {
        self.inner.touch(&self.source_path(path), mtime).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.inner.delete(&self.source_path(path)).await
    }

    async fn mkdir(&self, path: &str) -> StorageResult<()> {
        self.inner.mkdir(&self.source_path(path)).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.inner.exists(&self.source_path(path)).await
    }

    async fn is_creatable(&self, path: &str) -> StorageResult<bool> {
        self.inner.is_creatable(&self.source_path(path)).await
    }

    async fn is_updatable(&self, path: &str) -> StorageResult<bool> {
        self.inner.is_updatable(&self.source_path(path)).await
    }

    async fn mime_type(&self, path: &str) -> StorageResult<Option<String>> {
        self.inner.mime_type(&self.source_path(path)).await
    }

    fn is_instance_of(&self, marker: StorageMarker) -> bool {
        marker == StorageMarker::Jail || self.inner.is_instance_of(marker)
    }

    fn unjailed_path(&self, path: &str) -> String {
        self.inner.unjailed_path(&self.source_path(path))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    #[tokio::test]
    async fn test_paths_are_rebased() {
        let inner = Arc::new(InMemoryStorage::new());
        let jail = JailedStorage::new(Arc::clone(&inner), "__groupfolders/1");

        jail.write("/docs/a.txt", b"x").await.unwrap();
        assert!(inner.exists("__groupfolders/1/docs/a.txt").await.unwrap());
        assert_eq!(
            jail.unjailed_path("docs/a.txt"),
            "__groupfolders/1/docs/a.txt"
        );
        assert_eq!(jail.unjailed_path(""), "__groupfolders/1");
    }

    #[test]
    fn test_reports_jail_marker() {
        let jail = JailedStorage::new(Arc::new(InMemoryStorage::home()), "files/shared");
        assert!(jail.is_instance_of(StorageMarker::Jail));
        assert!(jail.is_instance_of(StorageMarker::Home));
    }
}
