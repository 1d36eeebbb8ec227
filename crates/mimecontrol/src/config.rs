//! Configuration for mimetype enforcement

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default name of the policy file inside the data directory.
pub const DEFAULT_CONFIG_FILENAME: &str = "staticmimecontrol.json";

/// Configuration for mimetype enforcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MimeControlConfig {
    /// Host data directory; the policy file lives here unless overridden
    pub data_directory: PathBuf,
    /// Explicit policy file location, overriding the data directory lookup
    pub policy_file: Option<PathBuf>,
    /// Policy file name inside the data directory
    pub config_filename: String,
    /// Leading path segment that marks the user files root on home storages
    pub files_root: String,
    /// Prefix of internal application data paths (never checked)
    pub appdata_prefix: String,
    /// Prefix of chunked upload staging paths (never checked)
    pub uploads_prefix: String,
    /// Whether streamed writes are verified after they complete
    pub scan_streams: bool,
}

impl Default for MimeControlConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("./data"),
            policy_file: None,
            config_filename: DEFAULT_CONFIG_FILENAME.to_string(),
            files_root: "files".to_string(),
            appdata_prefix: "appdata_oc".to_string(),
            uploads_prefix: "uploads/".to_string(),
            scan_streams: true,
        }
    }
}

impl MimeControlConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Location of the policy file.
    ///
    /// The explicit override wins; otherwise the configured file name inside
    /// the data directory.
    pub fn policy_path(&self) -> PathBuf {
        match &self.policy_file {
            Some(path) => path.clone(),
            None => self.data_directory.join(&self.config_filename),
        }
    }

    /// Set the data directory.
    pub fn with_data_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_directory = dir.as_ref().to_path_buf();
        self
    }

    /// Set an explicit policy file.
    pub fn with_policy_file(mut self, path: impl AsRef<Path>) -> Self {
        self.policy_file = Some(path.as_ref().to_path_buf());
        self
    }
}
