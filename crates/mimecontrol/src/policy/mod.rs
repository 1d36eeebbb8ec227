//! Mimetype policy: the document, where it comes from, and how it matches.
//!
//! A policy is a flat list of allow-rules. Each rule pairs a regex for the
//! logical directory with a regex for the mimetype:
//!
//! ```json
//! {
//!   "denyrootbydefault": true,
//!   "rules": [
//!     { "path": ".*", "mime": "image\\/jpeg" },
//!     { "path": "^(?!__groupfolders\\/8(\\/|$)).*$", "mime": "application\\/zip" }
//!   ]
//! }
//! ```
//!
//! A write is allowed when any rule matches both. There is no precedence
//! and no deny rule; negation is expressed inside the regex.

mod document;
mod matcher;
mod store;

pub use document::{PolicyDocument, PolicyLoadError, Rule};
pub use matcher::{MalformedRule, RuleMatcher};
pub use store::{JsonFileRuleStore, RuleStore, StaticRuleStore};
