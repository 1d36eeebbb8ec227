//! Mimecontrol: mimetype access control for storage writes
//!
//! Mimecontrol wraps a storage backend and classifies every write by its
//! destination directory and detected mimetype. Writes that no policy rule
//! allows are rejected up front, or, for streamed uploads, deleted right
//! after they land with the trash bypassed so the content does not survive.

mod activity;
mod actor;
mod classify;
mod config;
mod guard;
mod guarded;
mod storage;
mod stream;
mod trash;

pub mod policy;

pub use activity::{LogSink, MemorySink, ViolationEvent, ViolationSink};
pub use actor::{ActorTracker, Principal};
pub use classify::{Classification, PathClassifier};
pub use config::{DEFAULT_CONFIG_FILENAME, MimeControlConfig};
pub use guard::{AccessGuard, Decision, ROOT_DENIAL};
pub use guarded::{MimeGuardStorage, MimeGuardStorageBuilder};
pub use policy::{JsonFileRuleStore, PolicyDocument, Rule, RuleMatcher, RuleStore, StaticRuleStore};
pub use storage::{
    DIRECTORY_MIMETYPE, InMemoryStorage, InputStream, JailedStorage, Storage, StorageError,
    StorageMarker, StorageResult,
};
pub use stream::{
    ContentScanner, MimetypeScanner, MimetypeScannerFactory, ObservedReader, Quarantine,
    ScanState, ScanStatus, ScannerFactory, StreamObserver,
};
pub use trash::{DepthCountingTrash, TrashBin, TrashBypass};
