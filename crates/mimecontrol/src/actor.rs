//! Acting principal for log attribution.

use std::future::Future;
use std::sync::RwLock;

tokio::task_local! {
    static REQUEST_PRINCIPAL: Principal;
}

/// The user on whose behalf a write happens.
///
/// Only used to attribute denials in logs and violation events; it never
/// influences a decision.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Principal {
    /// Account identifier
    pub uid: String,
}

impl Principal {
    /// Create a principal from an account identifier.
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uid)
    }
}

/// Tracks the principal of the request currently using a storage.
///
/// Two sources, most specific first:
///
/// - a principal scoped to the current task with [`ActorTracker::scope`],
///   for hosts serving several users through one storage concurrently;
/// - the session principal set with [`begin_session`](Self::begin_session),
///   shared by every caller of the tracker.
#[derive(Debug, Default)]
pub struct ActorTracker {
    current: RwLock<Option<Principal>>,
}

impl ActorTracker {
    /// Create a tracker with no current principal.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Set the current principal.
    pub fn begin_session(&self, principal: Principal) {
        if let Ok(mut guard) = self.current.write() {
            *guard = Some(principal);
        }
    }

    /// Clear the current principal.
    pub fn end_session(&self) {
        if let Ok(mut guard) = self.current.write() {
            *guard = None;
        }
    }

    /// Run `fut` with `principal` acting for the current task.
    ///
    /// Applies to every tracker consulted while `fut` runs, and overrides
    /// their session principal.
    pub async fn scope<F: Future>(principal: Principal, fut: F) -> F::Output {
        REQUEST_PRINCIPAL.scope(principal, fut).await
    }

    /// Get the current principal (if any).
    pub fn current(&self) -> Option<Principal> {
        REQUEST_PRINCIPAL
            .try_with(Principal::clone)
            .ok()
            .or_else(|| self.current.read().ok().and_then(|g| g.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_tracker() {
        let tracker = ActorTracker::new();
        assert!(tracker.current().is_none());

        tracker.begin_session(Principal::new("alice"));
        assert_eq!(tracker.current().unwrap().uid, "alice");

        tracker.end_session();
        assert!(tracker.current().is_none());
    }

    #[tokio::test]
    async fn test_scoped_principal_overrides_session() {
        let tracker = ActorTracker::new();
        tracker.begin_session(Principal::new("session"));

        let (a, b) = tokio::join!(
            ActorTracker::scope(Principal::new("alice"), async { tracker.current() }),
            ActorTracker::scope(Principal::new("bob"), async {
                tokio::task::yield_now().await;
                tracker.current()
            }),
        );

        assert_eq!(a.unwrap().uid, "alice");
        assert_eq!(b.unwrap().uid, "bob");
        assert_eq!(tracker.current().unwrap().uid, "session");
    }
}
