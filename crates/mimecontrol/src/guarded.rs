//! Mimetype-enforcing storage wrapper.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::activity::{LogSink, ViolationEvent, ViolationSink};
use crate::actor::{ActorTracker, Principal};
use crate::config::MimeControlConfig;
use crate::guard::{AccessGuard, Decision};
use crate::storage::{InputStream, Storage, StorageError, StorageMarker, StorageResult};
use crate::stream::{ContentScanner, ObservedReader, Quarantine, ScanStatus, ScannerFactory};
use crate::trash::TrashBin;

/// A storage wrapper that enforces the mimetype policy on writes.
///
/// This wraps any [`Storage`] implementation:
///
/// - `is_creatable` / `is_updatable` answer `false` for denied paths.
/// - `write` and `touch` are checked before they reach the backend.
/// - `write_stream` is checked after the backend committed the bytes; a
///   rejected object is deleted with the trash paused.
///
/// Reads, deletes and directory creation pass through unchanged.
///
/// ## Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use mimecontrol::{AccessGuard, InMemoryStorage, MimeGuardStorage, MimeControlConfig};
///
/// let config = MimeControlConfig::default().with_data_directory("/srv/data");
/// let guard = Arc::new(AccessGuard::from_config(&config));
/// let storage = MimeGuardStorage::builder(Arc::new(InMemoryStorage::home()), guard).build();
///
/// // Fails with AccessDenied unless a rule allows text/plain in "Documents"
/// storage.write("files/Documents/notes.txt", b"hello").await?;
/// ```
pub struct MimeGuardStorage<S: Storage> {
    inner: Arc<S>,
    guard: Arc<AccessGuard>,
    actors: Arc<ActorTracker>,
    trash: Option<Arc<dyn TrashBin>>,
    sink: Arc<dyn ViolationSink>,
    scanner: Option<Arc<dyn ScannerFactory>>,
    scanning: AtomicBool,
}

impl<S: Storage> MimeGuardStorage<S> {
    /// Create a wrapper with no trash, logging violations.
    pub fn new(storage: Arc<S>, guard: Arc<AccessGuard>) -> Self {
        Self::builder(storage, guard).build()
    }

    /// Create a wrapper whose guard and stream scanning follow `config`.
    pub fn from_config(storage: Arc<S>, config: &MimeControlConfig) -> Self {
        Self::builder(storage, Arc::new(AccessGuard::from_config(config)))
            .scanning(config.scan_streams)
            .build()
    }

    /// Start building a wrapper.
    pub fn builder(storage: Arc<S>, guard: Arc<AccessGuard>) -> MimeGuardStorageBuilder<S> {
        MimeGuardStorageBuilder {
            inner: storage,
            guard,
            actors: None,
            trash: None,
            sink: None,
            scanner: None,
            scanning: true,
        }
    }

    /// Get a reference to the inner storage.
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Get a reference to the access guard.
    pub fn guard(&self) -> &Arc<AccessGuard> {
        &self.guard
    }

    /// Get a reference to the actor tracker.
    ///
    /// Use this to set the acting principal before filesystem operations.
    pub fn actors(&self) -> &Arc<ActorTracker> {
        &self.actors
    }

    /// Turn verification of streamed writes on or off.
    pub fn set_scanning(&self, enabled: bool) {
        self.scanning.store(enabled, Ordering::SeqCst);
    }

    /// Whether streamed writes are verified.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Check a write before it reaches the backend.
    async fn check_write(&self, path: &str) -> StorageResult<()> {
        let actor = self.actors.current();
        let decision = self.guard.evaluate(&*self.inner, path, actor.as_ref()).await?;
        if decision.allowed {
            return Ok(());
        }

        tracing::warn!(
            path = %path,
            actor = ?actor.as_ref().map(|a| a.uid.as_str()),
            reason = %decision.reason,
            "mimetype policy denied write"
        );
        self.sink.publish(ViolationEvent {
            subject_path: path.to_string(),
            mimetype: decision.mimetype.clone(),
            actor: actor.map(|a| a.uid),
            deleted: false,
            detail: decision.reason.clone(),
        });
        decision.into_result()
    }

    /// Capability predicates: a denial is just `false`.
    async fn permits(&self, path: &str) -> StorageResult<bool> {
        let actor = self.actors.current();
        let decision = self.guard.evaluate(&*self.inner, path, actor.as_ref()).await?;
        if let Some(reason) = decision.denial_reason() {
            tracing::debug!(path = %path, reason = %reason, "mimetype policy denies path");
        }
        Ok(decision.allowed)
    }

    /// Verdict for an object the backend already committed.
    ///
    /// The mimetype policy always applies; an installed scanner can only
    /// add a rejection.
    async fn verify_committed(
        &self,
        path: &str,
        actor: Option<&Principal>,
        scanner: Option<&mut Box<dyn ContentScanner>>,
    ) -> StorageResult<Decision> {
        let scan = match scanner {
            Some(scanner) => Some(scanner.complete_scan(&*self.inner, path).await?),
            None => None,
        };
        let decision = self.guard.evaluate(&*self.inner, path, actor).await?;
        match scan {
            Some(ScanStatus::Disallowed(details)) => Ok(Decision {
                allowed: false,
                reason: details,
                mimetype: decision.mimetype,
            }),
            _ => Ok(decision),
        }
    }
}

/// Builder for [`MimeGuardStorage`].
pub struct MimeGuardStorageBuilder<S: Storage> {
    inner: Arc<S>,
    guard: Arc<AccessGuard>,
    actors: Option<Arc<ActorTracker>>,
    trash: Option<Arc<dyn TrashBin>>,
    sink: Option<Arc<dyn ViolationSink>>,
    scanner: Option<Arc<dyn ScannerFactory>>,
    scanning: bool,
}

impl<S: Storage> MimeGuardStorageBuilder<S> {
    /// Share an actor tracker with the host's session handling.
    pub fn actors(mut self, actors: Arc<ActorTracker>) -> Self {
        self.actors = Some(actors);
        self
    }

    /// Bypass this trash when quarantining.
    pub fn trash(mut self, trash: Arc<dyn TrashBin>) -> Self {
        self.trash = Some(trash);
        self
    }

    /// Report violations here instead of the log.
    pub fn sink(mut self, sink: Arc<dyn ViolationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Verify streamed writes through scanners from this factory.
    pub fn scanner(mut self, factory: Arc<dyn ScannerFactory>) -> Self {
        self.scanner = Some(factory);
        self
    }

    /// Whether streamed writes are verified initially.
    pub fn scanning(mut self, enabled: bool) -> Self {
        self.scanning = enabled;
        self
    }

    /// Build the wrapper.
    pub fn build(self) -> MimeGuardStorage<S> {
        MimeGuardStorage {
            inner: self.inner,
            guard: self.guard,
            actors: self.actors.unwrap_or_default(),
            trash: self.trash,
            sink: self.sink.unwrap_or_else(|| Arc::new(LogSink)),
            scanner: self.scanner,
            scanning: AtomicBool::new(self.scanning),
        }
    }
}

impl<S: Storage> std::fmt::Debug for MimeGuardStorageBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MimeGuardStorageBuilder")
            .field("guard", &self.guard)
            .field("scanning", &self.scanning)
            .finish_non_exhaustive()
    }
}

impl<S: Storage> std::fmt::Debug for MimeGuardStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MimeGuardStorage")
            .field("guard", &self.guard)
            .field("actors", &self.actors)
            .field("trash", &self.trash)
            .field("scanning", &self.is_scanning())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: Storage + 'static> Storage for MimeGuardStorage<S> {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<u64> {
        self.check_write(path).await?;
        self.inner.write(path, data).await
    }

    async fn write_stream(
        &self,
        path: &str,
        stream: InputStream<'_>,
        size: Option<u64>,
    ) -> StorageResult<u64> {
        if !self.is_scanning() {
            return self.inner.write_stream(path, stream, size).await;
        }

        let actor = self.actors.current();
        let mut scanner = self.scanner.as_ref().map(|f| {
            let mut scanner = f.create(actor.clone());
            scanner.init_scan();
            scanner
        });

        let written = match scanner.as_mut() {
            Some(scanner) => {
                let mut reader = ObservedReader::new(stream, &mut **scanner);
                self.inner.write_stream(path, &mut reader, size).await?
            }
            None => self.inner.write_stream(path, stream, size).await?,
        };

        let quarantine = Quarantine {
            trash: self.trash.as_ref(),
            sink: &*self.sink,
        };
        let decision = match self
            .verify_committed(path, actor.as_ref(), scanner.as_mut())
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                // The bytes are committed but unverified; do not keep them.
                let detail = format!("verification failed: {e}");
                quarantine
                    .remove(&*self.inner, path, None, actor.as_ref(), &detail)
                    .await;
                return Err(e);
            }
        };
        if decision.allowed {
            return Ok(written);
        }

        quarantine
            .remove(
                &*self.inner,
                path,
                decision.mimetype,
                actor.as_ref(),
                &decision.reason,
            )
            .await;
        Err(StorageError::AccessDenied(decision.reason))
    }

    async fn touch(&self, path: &str, mtime: Option<SystemTime>) -> StorageResult<()> {
        self.check_write(path).await?;
        self.inner.touch(path, mtime).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.inner.delete(path).await
    }

    async fn mkdir(&self, path: &str) -> StorageResult<()> {
        self.inner.mkdir(path).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.inner.exists(path).await
    }

    async fn is_creatable(&self, path: &str) -> StorageResult<bool> {
        if !self.permits(path).await? {
            return Ok(false);
        }
        self.inner.is_creatable(path).await
    }

    async fn is_updatable(&self, path: &str) -> StorageResult<bool> {
        if !self.permits(path).await? {
            return Ok(false);
        }
        self.inner.is_updatable(path).await
    }

    async fn mime_type(&self, path: &str) -> StorageResult<Option<String>> {
        self.inner.mime_type(path).await
    }

    fn is_instance_of(&self, marker: StorageMarker) -> bool {
        self.inner.is_instance_of(marker)
    }

    fn unjailed_path(&self, path: &str) -> String {
        self.inner.unjailed_path(path)
    }
}
