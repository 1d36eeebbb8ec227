//! The policy document and its JSON form.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One permitted (directory, mimetype) combination.
///
/// Both fields are regex sources. A write is allowed when any rule matches
/// both its logical directory and its mimetype.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Pattern matched against the logical directory
    #[serde(rename = "path")]
    pub path_pattern: String,
    /// Pattern matched against the detected mimetype
    #[serde(rename = "mime")]
    pub mime_pattern: String,
}

impl Rule {
    /// Create a rule from a path pattern and a mimetype pattern.
    pub fn new(path_pattern: impl Into<String>, mime_pattern: impl Into<String>) -> Self {
        Self {
            path_pattern: path_pattern.into(),
            mime_pattern: mime_pattern.into(),
        }
    }
}

/// A loaded policy: the allow-rules and the root default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Reject writes directly into the files root
    #[serde(rename = "denyrootbydefault", default = "default_deny_root")]
    pub deny_root_by_default: bool,
    /// Allow-rules, in file order
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_deny_root() -> bool {
    true
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self::empty()
    }
}

impl PolicyDocument {
    /// The document used when no usable policy exists: no rules, root denied.
    pub fn empty() -> Self {
        Self {
            deny_root_by_default: true,
            rules: Vec::new(),
        }
    }

    /// Create a document from rules, with the root denied.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            deny_root_by_default: true,
            rules,
        }
    }

    /// Parse a policy document from JSON bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, PolicyLoadError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Why a policy could not be loaded. Never surfaced to storage callers.
#[derive(Debug, Error)]
pub enum PolicyLoadError {
    /// The policy file does not exist
    #[error("policy file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// The policy file could not be read
    #[error("failed to read policy file {}: {source}", path.display())]
    Io {
        /// The file that failed
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },
    /// The policy is not a well-formed document
    #[error("malformed policy document: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let doc = PolicyDocument::parse(
            br#"{
                "denyrootbydefault": false,
                "rules": [
                    {"path": ".*", "mime": "image\\/jpeg"},
                    {"path": "Folder1", "mime": "image.*"}
                ]
            }"#,
        )
        .unwrap();

        assert!(!doc.deny_root_by_default);
        assert_eq!(doc.rules.len(), 2);
        assert_eq!(doc.rules[0], Rule::new(".*", "image\\/jpeg"));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let doc = PolicyDocument::parse(b"{}").unwrap();
        assert_eq!(doc, PolicyDocument::empty());

        let doc = PolicyDocument::parse(br#"{"rules": []}"#).unwrap();
        assert!(doc.deny_root_by_default);
    }

    #[test]
    fn test_malformed_documents_fail() {
        assert!(PolicyDocument::parse(b"not json").is_err());
        assert!(PolicyDocument::parse(b"null").is_err());
        assert!(PolicyDocument::parse(br#"{"rules": [{"path": ".*"}]}"#).is_err());
        assert!(PolicyDocument::parse(br#"{"rules": "all"}"#).is_err());
    }
}
