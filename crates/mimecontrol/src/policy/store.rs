//! Policy sources.
//!
//! Stores hand out a freshly parsed [`PolicyDocument`] on every call. There
//! is no cache: an edited policy file takes effect on the next check.

use std::path::{Path, PathBuf};

use super::document::{PolicyDocument, PolicyLoadError};
use crate::config::MimeControlConfig;

/// A source of the current policy.
///
/// `load` never fails. A missing or unusable policy yields
/// [`PolicyDocument::empty`], which denies the files root and has no
/// allow-rules.
pub trait RuleStore: Send + Sync + std::fmt::Debug {
    /// Load the current policy.
    fn load(&self) -> PolicyDocument;
}

/// Reads the policy from a JSON file on every load.
#[derive(Clone, Debug)]
pub struct JsonFileRuleStore {
    path: PathBuf,
}

impl JsonFileRuleStore {
    /// Create a store reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store reading from the file named by the configuration.
    pub fn from_config(config: &MimeControlConfig) -> Self {
        Self::new(config.policy_path())
    }

    /// The policy file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the policy, reporting why it could not be loaded.
    pub fn try_load(&self) -> Result<PolicyDocument, PolicyLoadError> {
        let bytes = std::fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PolicyLoadError::NotFound(self.path.clone()),
            _ => PolicyLoadError::Io {
                path: self.path.clone(),
                source: e,
            },
        })?;
        PolicyDocument::parse(&bytes)
    }
}

impl RuleStore for JsonFileRuleStore {
    fn load(&self) -> PolicyDocument {
        match self.try_load() {
            Ok(doc) => doc,
            Err(e @ PolicyLoadError::NotFound(_)) => {
                tracing::debug!(error = %e, "no policy file, using empty policy");
                PolicyDocument::empty()
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to load policy, using empty policy"
                );
                PolicyDocument::empty()
            }
        }
    }
}

/// Holds raw policy JSON in memory and parses it on every load.
#[derive(Clone, Debug, Default)]
pub struct StaticRuleStore {
    source: Vec<u8>,
}

impl StaticRuleStore {
    /// Create a store over raw JSON bytes.
    pub fn new(source: impl Into<Vec<u8>>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Create a store holding the JSON form of `doc`.
    pub fn from_document(doc: &PolicyDocument) -> Self {
        Self {
            source: serde_json::to_vec(doc).unwrap_or_default(),
        }
    }
}

impl RuleStore for StaticRuleStore {
    fn load(&self) -> PolicyDocument {
        PolicyDocument::parse(&self.source).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to parse policy, using empty policy");
            PolicyDocument::empty()
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::policy::Rule;

    #[test]
    fn test_missing_file_yields_empty_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileRuleStore::new(dir.path().join("absent.json"));

        assert!(matches!(
            store.try_load(),
            Err(PolicyLoadError::NotFound(_))
        ));
        assert_eq!(store.load(), PolicyDocument::empty());
    }

    #[test]
    fn test_corrupt_file_yields_empty_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staticmimecontrol.json");
        std::fs::write(&path, b"{\"rules\": [").unwrap();

        let store = JsonFileRuleStore::new(&path);
        assert!(matches!(store.try_load(), Err(PolicyLoadError::Parse(_))));
        assert_eq!(store.load(), PolicyDocument::empty());
    }

    #[test]
    fn test_reload_sees_edits() {
        let dir = tempfile::tempdir().unwrap();
        let config = MimeControlConfig::default().with_data_directory(dir.path());
        let store = JsonFileRuleStore::from_config(&config);

        std::fs::write(
            config.policy_path(),
            br#"{"rules": [{"path": ".*", "mime": "text/plain"}]}"#,
        )
        .unwrap();
        assert_eq!(store.load().rules, vec![Rule::new(".*", "text/plain")]);

        std::fs::write(config.policy_path(), br#"{"denyrootbydefault": false}"#).unwrap();
        let doc = store.load();
        assert!(doc.rules.is_empty());
        assert!(!doc.deny_root_by_default);
    }

    #[test]
    fn test_static_store_round_trips_document() {
        let doc = PolicyDocument::with_rules(vec![Rule::new("^docs", "application/pdf")]);
        assert_eq!(StaticRuleStore::from_document(&doc).load(), doc);
        assert_eq!(StaticRuleStore::new("garbage").load(), PolicyDocument::empty());
    }
}
