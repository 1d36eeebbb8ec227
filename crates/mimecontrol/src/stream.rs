//! Post-write verification of streamed uploads.
//!
//! A streamed upload can only be classified once its bytes have landed,
//! so verification happens after the backend write. A rejected object is
//! quarantined: deleted with the trash paused, then reported.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};

use crate::activity::{ViolationEvent, ViolationSink};
use crate::actor::Principal;
use crate::guard::AccessGuard;
use crate::storage::{Storage, StorageResult};
use crate::trash::{TrashBin, TrashBypass};

/// Verdict of one scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScanStatus {
    /// Not checked yet
    #[default]
    Unchecked,
    /// Checked and allowed
    Allowed,
    /// Checked and rejected, with details
    Disallowed(String),
}

impl ScanStatus {
    /// Returns true for a rejection.
    pub fn is_disallowed(&self) -> bool {
        matches!(self, ScanStatus::Disallowed(_))
    }
}

/// Scan state across rescans of the same target.
///
/// A verdict is terminal: the first transition out of `Unchecked` sticks
/// until [`reset`](Self::reset). Resetting keeps a rejection from the
/// previous scan so it is not lost to an in-progress rescan.
#[derive(Clone, Debug, Default)]
pub struct ScanState {
    current: ScanStatus,
    preserved_denial: Option<ScanStatus>,
}

impl ScanState {
    /// Create an unchecked state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a verdict. Ignored if this scan already has one.
    pub fn record(&mut self, status: ScanStatus) {
        if self.current == ScanStatus::Unchecked {
            self.current = status;
        }
    }

    /// Start a new scan.
    pub fn reset(&mut self) {
        let previous = std::mem::take(&mut self.current);
        if previous.is_disallowed() {
            self.preserved_denial = Some(previous);
        }
    }

    /// Verdict of the scan in progress.
    pub fn current(&self) -> &ScanStatus {
        &self.current
    }

    /// The preserved rejection if any, else the current verdict.
    pub fn effective(&self) -> &ScanStatus {
        self.preserved_denial.as_ref().unwrap_or(&self.current)
    }

    /// Whether the last definitive verdict was a rejection.
    pub fn last_was_denial(&self) -> bool {
        match &self.current {
            ScanStatus::Unchecked => self.preserved_denial.is_some(),
            status => status.is_disallowed(),
        }
    }
}

/// Receives the bytes of a stream as they are read.
pub trait StreamObserver {
    /// A chunk was read.
    fn on_data(&mut self, chunk: &[u8]);

    /// The stream reached its end.
    fn on_end(&mut self);
}

/// A reader that reports every chunk to an observer.
///
/// `on_end` fires once, the first time the inner reader reports end of
/// stream.
#[derive(Debug)]
pub struct ObservedReader<'a, R, O: ?Sized> {
    inner: R,
    observer: &'a mut O,
    ended: bool,
}

impl<'a, R, O: StreamObserver + ?Sized> ObservedReader<'a, R, O> {
    /// Wrap `inner`, reporting to `observer`.
    pub fn new(inner: R, observer: &'a mut O) -> Self {
        Self {
            inner,
            observer,
            ended: false,
        }
    }

    /// Whether end of stream has been observed.
    pub fn ended(&self) -> bool {
        self.ended
    }
}

impl<R, O> AsyncRead for ObservedReader<'_, R, O>
where
    R: AsyncRead + Unpin,
    O: StreamObserver + ?Sized,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let had_room = buf.remaining() > 0;
        let before = buf.filled().len();

        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let chunk = &buf.filled()[before..];
        if !chunk.is_empty() {
            this.observer.on_data(chunk);
        } else if had_room && !this.ended {
            this.ended = true;
            this.observer.on_end();
        }
        Poll::Ready(Ok(()))
    }
}

/// A content scanner fed by an upload stream.
///
/// One scanner instance covers one stream.
#[async_trait]
pub trait ContentScanner: StreamObserver + Send + std::fmt::Debug {
    /// Prepare for a new scan of the same target.
    fn init_scan(&mut self);

    /// Produce the verdict for the committed object at `path`.
    async fn complete_scan(
        &mut self,
        storage: &dyn Storage,
        path: &str,
    ) -> StorageResult<ScanStatus>;

    /// The verdict reported to callers.
    fn status(&self) -> &ScanStatus;
}

/// Creates one scanner per stream.
pub trait ScannerFactory: Send + Sync + std::fmt::Debug {
    /// Create a scanner for a stream written by `actor`.
    fn create(&self, actor: Option<Principal>) -> Box<dyn ContentScanner>;
}

/// Scanner that applies the mimetype policy to the committed object.
///
/// Content is not inspected; the backend's mimetype detection is the
/// classifier. Chunks are only counted.
#[derive(Debug)]
pub struct MimetypeScanner {
    guard: Arc<AccessGuard>,
    actor: Option<Principal>,
    state: ScanState,
    byte_count: u64,
    ended: bool,
}

impl MimetypeScanner {
    /// Create a scanner evaluating `guard`.
    pub fn new(guard: Arc<AccessGuard>, actor: Option<Principal>) -> Self {
        Self {
            guard,
            actor,
            state: ScanState::new(),
            byte_count: 0,
            ended: false,
        }
    }

    /// Bytes seen in the current scan.
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// The scan state.
    pub fn state(&self) -> &ScanState {
        &self.state
    }
}

impl StreamObserver for MimetypeScanner {
    fn on_data(&mut self, chunk: &[u8]) {
        self.byte_count += chunk.len() as u64;
    }

    fn on_end(&mut self) {
        self.ended = true;
    }
}

#[async_trait]
impl ContentScanner for MimetypeScanner {
    fn init_scan(&mut self) {
        self.byte_count = 0;
        self.ended = false;
        self.state.reset();
    }

    async fn complete_scan(
        &mut self,
        storage: &dyn Storage,
        path: &str,
    ) -> StorageResult<ScanStatus> {
        if !self.ended {
            tracing::debug!(path = %path, bytes = self.byte_count, "scan completed before end of stream");
        }
        let decision = self.guard.evaluate(storage, path, self.actor.as_ref()).await?;
        self.state.record(if decision.allowed {
            ScanStatus::Allowed
        } else {
            ScanStatus::Disallowed(decision.reason)
        });
        Ok(self.state.effective().clone())
    }

    fn status(&self) -> &ScanStatus {
        self.state.effective()
    }
}

/// Builds [`MimetypeScanner`]s over a shared guard.
#[derive(Debug, Clone)]
pub struct MimetypeScannerFactory {
    guard: Arc<AccessGuard>,
}

impl MimetypeScannerFactory {
    /// Create a factory over `guard`.
    pub fn new(guard: Arc<AccessGuard>) -> Self {
        Self { guard }
    }
}

impl ScannerFactory for MimetypeScannerFactory {
    fn create(&self, actor: Option<Principal>) -> Box<dyn ContentScanner> {
        Box::new(MimetypeScanner::new(Arc::clone(&self.guard), actor))
    }
}

/// What the quarantine routine needs besides the storage.
#[derive(Debug, Clone, Copy)]
pub struct Quarantine<'a> {
    /// Trash to bypass, if the host has one
    pub trash: Option<&'a Arc<dyn TrashBin>>,
    /// Where the violation is reported
    pub sink: &'a dyn ViolationSink,
}

impl Quarantine<'_> {
    /// Delete a rejected object and report it.
    ///
    /// The trash stays paused only for the deletion itself. Deletion
    /// failures are logged; the caller still reports the denial. Returns
    /// whether the object was deleted.
    pub async fn remove<S: Storage + ?Sized>(
        &self,
        storage: &S,
        path: &str,
        mimetype: Option<String>,
        actor: Option<&Principal>,
        detail: &str,
    ) -> bool {
        tracing::warn!(
            path = %path,
            actor = ?actor.map(|a| a.uid.as_str()),
            detail = %detail,
            "disallowed mimetype written"
        );

        let deleted = {
            let _bypass = self.trash.and_then(TrashBypass::acquire);
            match storage.delete(path).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "failed to delete disallowed file");
                    false
                }
            }
        };

        if deleted {
            tracing::error!(
                path = %path,
                actor = ?actor.map(|a| a.uid.as_str()),
                detail = %detail,
                "disallowed mimetype found, file deleted"
            );
        }

        self.sink.publish(ViolationEvent {
            subject_path: path.to_string(),
            mimetype,
            actor: actor.map(|a| a.uid.clone()),
            deleted,
            detail: detail.to_string(),
        });
        deleted
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::activity::MemorySink;
    use crate::policy::{PolicyDocument, Rule, StaticRuleStore};
    use crate::storage::InMemoryStorage;
    use crate::trash::DepthCountingTrash;

    #[derive(Debug, Default)]
    struct Recorder {
        chunks: Vec<Vec<u8>>,
        ends: usize,
    }

    impl StreamObserver for Recorder {
        fn on_data(&mut self, chunk: &[u8]) {
            self.chunks.push(chunk.to_vec());
        }

        fn on_end(&mut self) {
            self.ends += 1;
        }
    }

    #[tokio::test]
    async fn test_observed_reader_reports_chunks_and_end_once() {
        let mut recorder = Recorder::default();
        let input: &[u8] = b"0123456789";
        let mut reader = ObservedReader::new(input, &mut recorder);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        let mut extra = [0u8; 4];
        assert_eq!(reader.read(&mut extra).await.unwrap(), 0);
        assert!(reader.ended());

        assert_eq!(out, b"0123456789");
        assert_eq!(recorder.chunks.concat(), b"0123456789");
        assert_eq!(recorder.ends, 1);
    }

    #[test]
    fn test_scan_state_is_terminal() {
        let mut state = ScanState::new();
        state.record(ScanStatus::Allowed);
        state.record(ScanStatus::Disallowed("late".to_string()));
        assert_eq!(state.current(), &ScanStatus::Allowed);
    }

    #[test]
    fn test_scan_state_preserves_denial_across_reset() {
        let mut state = ScanState::new();
        state.record(ScanStatus::Disallowed("zip in Folder1".to_string()));
        state.reset();

        assert_eq!(state.current(), &ScanStatus::Unchecked);
        assert!(state.last_was_denial());
        assert!(state.effective().is_disallowed());

        state.record(ScanStatus::Allowed);
        assert!(!state.last_was_denial());
        assert!(state.effective().is_disallowed());
    }

    #[tokio::test]
    async fn test_mimetype_scanner_verdict() {
        let doc = PolicyDocument::with_rules(vec![Rule::new(".*", "image/jpeg")]);
        let guard = Arc::new(AccessGuard::new(Arc::new(StaticRuleStore::from_document(
            &doc,
        ))));
        let storage = InMemoryStorage::new();
        storage.write("files/a.png", b"png").await.unwrap();

        let mut scanner = MimetypeScannerFactory::new(guard).create(None);
        scanner.init_scan();
        scanner.on_data(b"png");
        scanner.on_end();

        let status = scanner.complete_scan(&storage, "files/a.png").await.unwrap();
        assert!(status.is_disallowed());
        assert!(scanner.status().is_disallowed());
    }

    #[tokio::test]
    async fn test_quarantine_deletes_and_reports() {
        let storage = InMemoryStorage::new();
        storage.write("files/bad.exe", b"MZ").await.unwrap();
        let counting = Arc::new(DepthCountingTrash::new());
        let trash: Arc<dyn TrashBin> = counting.clone();
        let sink = MemorySink::new();

        let quarantine = Quarantine {
            trash: Some(&trash),
            sink: &sink,
        };
        let deleted = quarantine
            .remove(&storage, "files/bad.exe", None, None, "exe in folder .")
            .await;

        assert!(deleted);
        assert!(!storage.exists("files/bad.exe").await.unwrap());
        assert_eq!(counting.pause_count(), 1);
        assert_eq!(counting.resume_count(), 1);
        assert_eq!(sink.events().len(), 1);
        assert!(sink.events()[0].deleted);
    }

    #[tokio::test]
    async fn test_quarantine_resumes_trash_when_delete_fails() {
        let storage = InMemoryStorage::new();
        let counting = Arc::new(DepthCountingTrash::new());
        let trash: Arc<dyn TrashBin> = counting.clone();
        let sink = MemorySink::new();

        let deleted = Quarantine {
            trash: Some(&trash),
            sink: &sink,
        }
        .remove(&storage, "files/missing.exe", None, None, "gone")
        .await;

        assert!(!deleted);
        assert!(!counting.is_paused());
        assert_eq!(counting.resume_count(), 1);
        assert!(!sink.events()[0].deleted);
    }
}
