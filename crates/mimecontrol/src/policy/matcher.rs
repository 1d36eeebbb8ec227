//! Rule evaluation.

use fancy_regex::Regex;

use super::document::{PolicyDocument, Rule};
use crate::storage::DIRECTORY_MIMETYPE;

/// A rule whose patterns could not be compiled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedRule {
    /// Position of the rule in the policy
    pub index: usize,
    /// The offending rule
    pub rule: Rule,
    /// Compiler message
    pub error: String,
}

/// Evaluates a policy's allow-rules for a (directory, mimetype) pair.
///
/// Patterns are unanchored and case-sensitive; anchors and look-around in
/// the pattern itself are honoured. Patterns are compiled per evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuleMatcher;

impl RuleMatcher {
    /// Create a matcher.
    pub fn new() -> Self {
        Self
    }

    /// Whether `mimetype` may be written into `directory` under `policy`.
    ///
    /// Directories and unclassified content are always allowed. Otherwise
    /// some rule must match both the directory and the mimetype. A rule that
    /// fails to compile is skipped with a warning.
    pub fn matches(&self, directory: &str, mimetype: Option<&str>, policy: &PolicyDocument) -> bool {
        let mimetype = match mimetype {
            None | Some("") => return true,
            Some(DIRECTORY_MIMETYPE) => return true,
            Some(m) => m,
        };

        policy.rules.iter().enumerate().any(|(index, rule)| {
            match rule_matches(rule, directory, mimetype) {
                Ok(matched) => matched,
                Err(error) => {
                    tracing::warn!(
                        index,
                        path_pattern = %rule.path_pattern,
                        mime_pattern = %rule.mime_pattern,
                        error = %error,
                        "skipping malformed rule"
                    );
                    false
                }
            }
        })
    }

    /// List the rules in `policy` whose patterns do not compile.
    pub fn validate(&self, policy: &PolicyDocument) -> Vec<MalformedRule> {
        policy
            .rules
            .iter()
            .enumerate()
            .filter_map(|(index, rule)| {
                compile(rule).err().map(|error| MalformedRule {
                    index,
                    rule: rule.clone(),
                    error: error.to_string(),
                })
            })
            .collect()
    }
}

fn compile(rule: &Rule) -> Result<(Regex, Regex), fancy_regex::Error> {
    Ok((
        Regex::new(&rule.path_pattern)?,
        Regex::new(&rule.mime_pattern)?,
    ))
}

// Runtime errors (backtrack limit) count as malformed too.
fn rule_matches(rule: &Rule, directory: &str, mimetype: &str) -> Result<bool, fancy_regex::Error> {
    let (path_re, mime_re) = compile(rule)?;
    Ok(path_re.is_match(directory)? && mime_re.is_match(mimetype)?)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn policy(rules: &[(&str, &str)]) -> PolicyDocument {
        PolicyDocument::with_rules(rules.iter().map(|(p, m)| Rule::new(*p, *m)).collect())
    }

    #[test]
    fn test_existential_match() {
        let policy = policy(&[(".*", "image/jpeg"), ("Folder1", "image.*")]);
        let matcher = RuleMatcher::new();

        assert!(matcher.matches(".", Some("image/jpeg"), &policy));
        assert!(matcher.matches("Folder1", Some("image/png"), &policy));
        assert!(matcher.matches("Folder1/sub", Some("image/gif"), &policy));
        assert!(!matcher.matches(".", Some("image/png"), &policy));
        assert!(!matcher.matches("Folder1", Some("text/plain"), &policy));
    }

    #[test]
    fn test_patterns_are_case_sensitive_substring_searches() {
        let policy = policy(&[("older", "^text/")]);
        let matcher = RuleMatcher::new();

        assert!(matcher.matches("Folder3", Some("text/plain"), &policy));
        assert!(!matcher.matches("FOLDER3", Some("text/plain"), &policy));
        assert!(!matcher.matches("Folder3", Some("application/text"), &policy));
    }

    #[test]
    fn test_negative_lookahead() {
        let policy = policy(&[(r"^(?!__groupfolders\/8(\/|$)).*$", r"application\/zip")]);
        let matcher = RuleMatcher::new();

        assert!(!matcher.matches("__groupfolders/8", Some("application/zip"), &policy));
        assert!(!matcher.matches("__groupfolders/8/sub", Some("application/zip"), &policy));
        assert!(matcher.matches("__groupfolders/80", Some("application/zip"), &policy));
        assert!(matcher.matches("__groupfolders/1", Some("application/zip"), &policy));
    }

    #[test]
    fn test_directories_and_unknown_types_allowed() {
        let empty = PolicyDocument::empty();
        let matcher = RuleMatcher::new();

        assert!(matcher.matches("any", Some(DIRECTORY_MIMETYPE), &empty));
        assert!(matcher.matches("any", Some(""), &empty));
        assert!(matcher.matches("any", None, &empty));
        assert!(!matcher.matches("any", Some("text/plain"), &empty));
    }

    #[test]
    fn test_malformed_rule_does_not_block_others() {
        let policy = policy(&[("([unclosed", "text/plain"), ("docs", "text/plain")]);
        let matcher = RuleMatcher::new();

        assert!(matcher.matches("docs", Some("text/plain"), &policy));
        assert!(!matcher.matches("other", Some("text/plain"), &policy));
    }

    #[test]
    fn test_validate_reports_malformed_rules() {
        let policy = policy(&[(".*", "image/jpeg"), ("ok", "(bad")]);
        let malformed = RuleMatcher::new().validate(&policy);

        assert_eq!(malformed.len(), 1);
        assert_eq!(malformed[0].index, 1);
        assert_eq!(malformed[0].rule.mime_pattern, "(bad");
    }
}
