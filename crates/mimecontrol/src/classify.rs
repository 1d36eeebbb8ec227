//! Path classification.
//!
//! Turns a raw storage path into the logical path that policy is written
//! against, and decides whether the path is subject to policy at all.
//!
//! | Storage | Raw path | Logical path | Outcome |
//! |---------|----------|--------------|---------|
//! | home | `files/Photos/a.jpg` | `Photos/a.jpg` | checked in `Photos` |
//! | home | `files/a.jpg` | `a.jpg` | checked in `.` |
//! | home | `files` | (empty) | root |
//! | home | `cache/x` | `cache/x` | exempt |
//! | any | `appdata_oc.../x` | | exempt |
//! | any | `uploads/...` | | exempt |
//! | group folder jail | `a.zip` | `__groupfolders/8/a.zip` | checked in `__groupfolders/8` |

use crate::config::MimeControlConfig;
use crate::storage::{Storage, StorageMarker};

/// How a raw path relates to policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    /// Never subject to policy
    pub exempt: bool,
    /// The write targets the files root itself
    pub root: bool,
    /// The path with topology prefixes removed
    pub logical_path: String,
    /// Directory used for rule matching (`.` for top-level entries)
    pub logical_directory: String,
    /// The absolute path the decision was based on
    pub absolute_path: String,
    /// A mimetype must be probed before rules can be evaluated
    pub mime_probe_needed: bool,
}

impl Classification {
    fn exempt(logical_path: &str, absolute_path: &str) -> Self {
        Self {
            exempt: true,
            root: false,
            logical_path: logical_path.to_string(),
            logical_directory: String::new(),
            absolute_path: absolute_path.to_string(),
            mime_probe_needed: false,
        }
    }
}

/// Normalizes raw storage paths and decides policy exemptions.
#[derive(Clone, Debug)]
pub struct PathClassifier {
    files_root: String,
    appdata_prefix: String,
    uploads_prefix: String,
}

impl Default for PathClassifier {
    fn default() -> Self {
        Self::from_config(&MimeControlConfig::default())
    }
}

impl PathClassifier {
    /// Create a classifier using the markers from `config`.
    pub fn from_config(config: &MimeControlConfig) -> Self {
        Self {
            files_root: config.files_root.clone(),
            appdata_prefix: config.appdata_prefix.clone(),
            uploads_prefix: config.uploads_prefix.clone(),
        }
    }

    /// Classify `raw_path` as seen by `storage`.
    pub fn classify<S: Storage + ?Sized>(&self, storage: &S, raw_path: &str) -> Classification {
        let absolute_path = if storage.is_instance_of(StorageMarker::Jail) {
            storage.unjailed_path(raw_path)
        } else {
            raw_path.to_string()
        };

        let trimmed = absolute_path.trim_start_matches('/');
        let logical = match self.strip_files_root(trimmed) {
            Some(rest) => rest,
            // Home storages keep caches, versions and trash next to `files`.
            None if storage.is_instance_of(StorageMarker::Home) => {
                return Classification::exempt(trimmed, &absolute_path);
            }
            None => trimmed,
        };
        let logical = logical.trim_end_matches('/');

        if logical.starts_with(&self.appdata_prefix) || logical.starts_with(&self.uploads_prefix) {
            return Classification::exempt(logical, &absolute_path);
        }

        let logical_path = logical.to_string();
        let logical_directory = parent_directory(logical).map(str::to_string);
        match logical_directory {
            None => Classification {
                exempt: false,
                root: true,
                logical_path,
                logical_directory: String::new(),
                absolute_path,
                mime_probe_needed: true,
            },
            Some(logical_directory) => Classification {
                exempt: false,
                root: false,
                logical_path,
                logical_directory,
                absolute_path,
                mime_probe_needed: true,
            },
        }
    }

    /// Strip the leading `files` segment, if the path starts with one.
    fn strip_files_root<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.files_root.as_str())?;
        if rest.is_empty() {
            Some(rest)
        } else {
            rest.strip_prefix('/').map(|r| r.trim_start_matches('/'))
        }
    }
}

/// Directory portion of a normalized path.
///
/// `a/b/c` gives `a/b`, `c` gives `.`, and the empty path has no parent.
fn parent_directory(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(idx) => {
            let dir = path[..idx].trim_end_matches('/');
            Some(if dir.is_empty() { "." } else { dir })
        }
        None => Some("."),
    }
}
