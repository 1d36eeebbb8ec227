//! In-memory storage backend.

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use super::{
    DIRECTORY_MIMETYPE, InputStream, Storage, StorageError, StorageMarker, StorageResult,
    normalize,
};

/// A storage backend that keeps files in memory.
///
/// Mimetype detection mirrors what a real backend does without looking at
/// content: an explicit override wins, directories report
/// [`DIRECTORY_MIMETYPE`], and everything else is guessed from the file
/// extension. Paths that do not exist yet are still guessed, so capability
/// checks can run before a file is created.
///
/// Parent directories are not required to exist.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
    dirs: RwLock<HashSet<String>>,
    mime_overrides: RwLock<HashMap<String, String>>,
    home: bool,
}

impl InMemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty storage that reports itself as a home storage.
    pub fn home() -> Self {
        Self {
            home: true,
            ..Self::default()
        }
    }

    /// Force the mimetype reported for `path`, whether or not it exists.
    pub async fn set_mime_type(&self, path: &str, mimetype: impl Into<String>) {
        self.mime_overrides
            .write()
            .await
            .insert(normalize(path).to_string(), mimetype.into());
    }

    /// Number of files currently stored.
    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let key = normalize(path);
        if let Some(data) = self.files.read().await.get(key) {
            return Ok(data.clone());
        }
        if self.dirs.read().await.contains(key) {
            return Err(StorageError::NotAFile(key.to_string()));
        }
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<u64> {
        let key = normalize(path);
        if self.dirs.read().await.contains(key) {
            return Err(StorageError::NotAFile(key.to_string()));
        }
        self.files
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(data.len() as u64)
    }

    async fn write_stream(
        &self,
        path: &str,
        stream: InputStream<'_>,
        _size: Option<u64>,
    ) -> StorageResult<u64> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        self.write(path, &data).await
    }

    async fn touch(&self, path: &str, _mtime: Option<SystemTime>) -> StorageResult<()> {
        let key = normalize(path);
        if self.dirs.read().await.contains(key) {
            return Ok(());
        }
        self.files
            .write()
            .await
            .entry(key.to_string())
            .or_default();
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let key = normalize(path);
        if self.files.write().await.remove(key).is_some() {
            return Ok(());
        }
        if self.dirs.write().await.remove(key) {
            return Ok(());
        }
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn mkdir(&self, path: &str) -> StorageResult<()> {
        let key = normalize(path);
        if self.files.read().await.contains_key(key) {
            return Err(StorageError::NotAFile(key.to_string()));
        }
        self.dirs.write().await.insert(key.to_string());
        Ok(())
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let key = normalize(path);
        Ok(key.is_empty()
            || self.files.read().await.contains_key(key)
            || self.dirs.read().await.contains(key))
    }

    async fn is_creatable(&self, _path: &str) -> StorageResult<bool> {
        Ok(true)
    }

    async fn is_updatable(&self, _path: &str) -> StorageResult<bool> {
        Ok(true)
    }

    async fn mime_type(&self, path: &str) -> StorageResult<Option<String>> {
        let key = normalize(path);
        if let Some(mime) = self.mime_overrides.read().await.get(key) {
            return Ok(Some(mime.clone()));
        }
        if key.is_empty() || self.dirs.read().await.contains(key) {
            return Ok(Some(DIRECTORY_MIMETYPE.to_string()));
        }
        Ok(mime_guess::from_path(key).first_raw().map(str::to_string))
    }

    fn is_instance_of(&self, marker: StorageMarker) -> bool {
        marker == StorageMarker::Home && self.home
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let storage = InMemoryStorage::new();
        let written = storage.write("/files/a.txt", b"hello").await.unwrap();
        assert_eq!(written, 5);
        assert_eq!(storage.read("files/a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_write_stream_reads_to_end() {
        let storage = InMemoryStorage::new();
        let mut input: &[u8] = b"streamed bytes";
        let written = storage
            .write_stream("files/s.bin", &mut input, None)
            .await
            .unwrap();
        assert_eq!(written, 14);
        assert_eq!(storage.read("files/s.bin").await.unwrap(), b"streamed bytes");
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let storage = InMemoryStorage::new();
        match storage.delete("nope.txt").await {
            Err(StorageError::NotFound(p)) => assert_eq!(p, "nope.txt"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mime_detection() {
        let storage = InMemoryStorage::new();
        storage.mkdir("files/photos").await.unwrap();
        storage.set_mime_type("files/blob", "application/zip").await;

        assert_eq!(
            storage.mime_type("files/photos").await.unwrap().as_deref(),
            Some(DIRECTORY_MIMETYPE)
        );
        assert_eq!(
            storage.mime_type("files/a.jpg").await.unwrap().as_deref(),
            Some("image/jpeg")
        );
        assert_eq!(
            storage.mime_type("files/blob").await.unwrap().as_deref(),
            Some("application/zip")
        );
        assert_eq!(storage.mime_type("files/noext").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_touch_creates_empty_file() {
        let storage = InMemoryStorage::new();
        storage.touch("files/empty", None).await.unwrap();
        assert!(storage.exists("files/empty").await.unwrap());
        assert!(storage.read("files/empty").await.unwrap().is_empty());
    }

    #[test]
    fn test_home_marker() {
        assert!(InMemoryStorage::home().is_instance_of(StorageMarker::Home));
        assert!(!InMemoryStorage::new().is_instance_of(StorageMarker::Home));
        assert!(!InMemoryStorage::home().is_instance_of(StorageMarker::Jail));
    }
}
