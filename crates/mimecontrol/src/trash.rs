//! Trash bypass for quarantine deletions.
//!
//! The host's trash subsystem intercepts deletions and keeps a copy. A
//! quarantined object must not survive there, so deletion happens while the
//! trash is paused. Pausing is process-wide state owned by the trash; this
//! module only brackets deletions with a scoped handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The host's trash subsystem.
///
/// Nested pauses must each be matched by one resume.
pub trait TrashBin: Send + Sync + std::fmt::Debug {
    /// Whether the trash is active for this storage.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Stop intercepting deletions.
    fn pause(&self);

    /// Resume intercepting deletions.
    fn resume(&self);
}

/// A paused trash. Resumes it when dropped.
#[derive(Debug)]
#[must_use = "the trash resumes as soon as the bypass is dropped"]
pub struct TrashBypass {
    trash: Arc<dyn TrashBin>,
}

impl TrashBypass {
    /// Pause `trash` if it is enabled.
    ///
    /// Returns `None` when the trash is disabled and nothing was paused.
    pub fn acquire(trash: &Arc<dyn TrashBin>) -> Option<Self> {
        if !trash.is_enabled() {
            return None;
        }
        trash.pause();
        Some(Self {
            trash: Arc::clone(trash),
        })
    }
}

impl Drop for TrashBypass {
    fn drop(&mut self) {
        self.trash.resume();
    }
}

/// A trash that only tracks pause depth.
///
/// Useful for hosts without a trash of their own and for tests.
#[derive(Debug, Default)]
pub struct DepthCountingTrash {
    depth: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
}

impl DepthCountingTrash {
    /// Create an active trash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether at least one pause is outstanding.
    pub fn is_paused(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }

    /// Total number of pauses so far.
    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    /// Total number of resumes so far.
    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl TrashBin for DepthCountingTrash {
    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        // Saturate: an unmatched resume must not wrap the counter.
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
    }
}
