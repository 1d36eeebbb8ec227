//! The access guard: one allow/deny decision per write.

use std::sync::Arc;

use crate::actor::Principal;
use crate::classify::{Classification, PathClassifier};
use crate::config::MimeControlConfig;
use crate::policy::{JsonFileRuleStore, PolicyDocument, RuleMatcher, RuleStore};
use crate::storage::{DIRECTORY_MIMETYPE, Storage, StorageError, StorageResult};

/// Detail used when a write targets the files root.
pub const ROOT_DENIAL: &str = "default folder";

/// The outcome of one evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Whether the write may proceed
    pub allowed: bool,
    /// Why; the denial detail when not allowed
    pub reason: String,
    /// The probed mimetype, if a probe happened
    pub mimetype: Option<String>,
}

impl Decision {
    fn allow(reason: impl Into<String>, mimetype: Option<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            mimetype,
        }
    }

    fn deny(reason: impl Into<String>, mimetype: Option<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            mimetype,
        }
    }

    /// Returns true if the write is allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Returns the denial detail if denied, None if allowed.
    pub fn denial_reason(&self) -> Option<&str> {
        (!self.allowed).then_some(self.reason.as_str())
    }

    /// Convert into a storage result, mapping a denial to
    /// [`StorageError::AccessDenied`].
    pub fn into_result(self) -> StorageResult<()> {
        if self.allowed {
            Ok(())
        } else {
            Err(StorageError::AccessDenied(self.reason))
        }
    }
}

/// Scratch state for one evaluation. Never outlives the call.
struct EnforcementContext<'a, S: Storage + ?Sized> {
    raw_path: &'a str,
    storage: &'a S,
    policy: PolicyDocument,
    actor: Option<&'a Principal>,
}

/// Composes path classification and rule matching into one decision.
///
/// The policy is loaded from the rule store on every evaluation.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    store: Arc<dyn RuleStore>,
    classifier: PathClassifier,
    matcher: RuleMatcher,
}

impl AccessGuard {
    /// Create a guard over a rule store with default path markers.
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            classifier: PathClassifier::default(),
            matcher: RuleMatcher::new(),
        }
    }

    /// Create a guard reading the policy file named by `config`.
    pub fn from_config(config: &MimeControlConfig) -> Self {
        Self {
            store: Arc::new(JsonFileRuleStore::from_config(config)),
            classifier: PathClassifier::from_config(config),
            matcher: RuleMatcher::new(),
        }
    }

    /// Replace the path classifier.
    pub fn with_classifier(mut self, classifier: PathClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// The rule store this guard reads from.
    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    /// The path classifier.
    pub fn classifier(&self) -> &PathClassifier {
        &self.classifier
    }

    /// Decide whether the object at `raw_path` may exist in `storage`.
    ///
    /// Backend failures while probing the mimetype are returned as errors;
    /// denials are returned as a [`Decision`].
    pub async fn evaluate<S: Storage + ?Sized>(
        &self,
        storage: &S,
        raw_path: &str,
        actor: Option<&Principal>,
    ) -> StorageResult<Decision> {
        let classification = self.classifier.classify(storage, raw_path);
        if classification.exempt {
            tracing::debug!(path = %raw_path, "path exempt from mimetype policy");
            return Ok(Decision::allow("exempt path", None));
        }

        let ctx = EnforcementContext {
            raw_path,
            storage,
            policy: self.store.load(),
            actor,
        };
        self.decide(&ctx, &classification).await
    }

    /// Like [`evaluate`](Self::evaluate), but a denial becomes
    /// [`StorageError::AccessDenied`].
    pub async fn check<S: Storage + ?Sized>(
        &self,
        storage: &S,
        raw_path: &str,
        actor: Option<&Principal>,
    ) -> StorageResult<()> {
        self.evaluate(storage, raw_path, actor).await?.into_result()
    }

    async fn decide<S: Storage + ?Sized>(
        &self,
        ctx: &EnforcementContext<'_, S>,
        classification: &Classification,
    ) -> StorageResult<Decision> {
        if classification.root {
            return Ok(if ctx.policy.deny_root_by_default {
                Decision::deny(ROOT_DENIAL, None)
            } else {
                Decision::allow("files root", None)
            });
        }

        let mimetype = ctx.storage.mime_type(ctx.raw_path).await?;
        if mimetype.as_deref() == Some(DIRECTORY_MIMETYPE) {
            return Ok(Decision::allow("directory", mimetype));
        }

        if self.matcher.matches(
            &classification.logical_directory,
            mimetype.as_deref(),
            &ctx.policy,
        ) {
            tracing::debug!(
                path = %ctx.raw_path,
                directory = %classification.logical_directory,
                mimetype = ?mimetype,
                "mimetype allowed"
            );
            return Ok(Decision::allow("matched rule", mimetype));
        }

        let mut detail = format!(
            "{} in folder {} (absolute path: {})",
            mimetype.as_deref().unwrap_or_default(),
            classification.logical_directory,
            classification.absolute_path
        );
        if let Some(actor) = ctx.actor {
            detail.push_str(&format!(" account: {}", actor));
        }
        Ok(Decision::deny(detail, mimetype))
    }
}
