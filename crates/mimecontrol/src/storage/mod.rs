//! The storage interface that the access guard decorates.
//!
//! Every backend (the host's home storage, an external mount, a sandboxed
//! sub-view, or a test double) implements [`Storage`]. The guarded storage
//! implements the same trait and holds one backend by composition, so
//! backends are interchangeable at this boundary.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

mod jail;
mod memory;

pub use jail::JailedStorage;
pub use memory::InMemoryStorage;

/// Mimetype that backends report for directories.
pub const DIRECTORY_MIMETYPE: &str = "httpd/unix-directory";

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The write was rejected by the mimetype policy.
    #[error("access denied to {0}")]
    AccessDenied(String),
    /// File or directory not found
    #[error("file not found: {0}")]
    NotFound(String),
    /// Path is not a file
    #[error("not a file: {0}")]
    NotAFile(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Any other failure reported by the backend
    #[error("storage error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns true if this error is a policy denial.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, StorageError::AccessDenied(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Capability markers a backend can report about itself.
///
/// The path classifier uses these to work out which storage topology
/// produced a path instead of guessing from its shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageMarker {
    /// A user's home storage; user files live under the `files` root.
    Home,
    /// A restricted sub-view of another storage. Paths are relative to the
    /// jail root; [`Storage::unjailed_path`] gives the absolute path.
    Jail,
}

/// A readable stream handed to [`Storage::write_stream`].
pub type InputStream<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// Storage backend operations.
///
/// Paths are relative to the storage root and use `/` separators. A leading
/// `/` is tolerated.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the full contents of a file.
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Replace the contents of a file, creating it if needed.
    ///
    /// Returns the number of bytes written.
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<u64>;

    /// Write a file from a stream.
    ///
    /// `size` is a hint; backends read until end of stream. Returns the
    /// number of bytes written.
    async fn write_stream(
        &self,
        path: &str,
        stream: InputStream<'_>,
        size: Option<u64>,
    ) -> StorageResult<u64>;

    /// Create an empty file or update its modification time.
    async fn touch(&self, path: &str, mtime: Option<SystemTime>) -> StorageResult<()>;

    /// Delete a file or an empty directory.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Create a directory.
    async fn mkdir(&self, path: &str) -> StorageResult<()>;

    /// Check whether a path exists.
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Whether a new file may be created at `path`.
    async fn is_creatable(&self, path: &str) -> StorageResult<bool>;

    /// Whether the file at `path` may be modified.
    async fn is_updatable(&self, path: &str) -> StorageResult<bool>;

    /// The backend-detected mimetype of `path`.
    ///
    /// `None` means the backend could not classify the path.
    async fn mime_type(&self, path: &str) -> StorageResult<Option<String>>;

    /// Whether this backend reports the given capability marker.
    fn is_instance_of(&self, _marker: StorageMarker) -> bool {
        false
    }

    /// The absolute path of `path` for a jailed storage.
    ///
    /// Storages that are not sub-views return the path unchanged.
    fn unjailed_path(&self, path: &str) -> String {
        path.to_string()
    }
}

#[async_trait]
impl<T: Storage + ?Sized> Storage for Arc<T> {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<u64> {
        (**self).write(path, data).await
    }

    async fn write_stream(
        &self,
        path: &str,
        stream: InputStream<'_>,
        size: Option<u64>,
    ) -> StorageResult<u64> {
        (**self).write_stream(path, stream, size).await
    }

    async fn touch(&self, path: &str, mtime: Option<SystemTime>) -> StorageResult<()> {
        (**self).touch(path, mtime).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        (**self).delete(path).await
    }

    async fn mkdir(&self, path: &str) -> StorageResult<()> {
        (**self).mkdir(path).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        (**self).exists(path).await
    }

    async fn is_creatable(&self, path: &str) -> StorageResult<bool> {
        (**self).is_creatable(path).await
    }

    async fn is_updatable(&self, path: &str) -> StorageResult<bool> {
        (**self).is_updatable(path).await
    }

    async fn mime_type(&self, path: &str) -> StorageResult<Option<String>> {
        (**self).mime_type(path).await
    }

    fn is_instance_of(&self, marker: StorageMarker) -> bool {
        (**self).is_instance_of(marker)
    }

    fn unjailed_path(&self, path: &str) -> String {
        (**self).unjailed_path(path)
    }
}

/// Strip leading and trailing separators from a storage path.
pub(crate) fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}
