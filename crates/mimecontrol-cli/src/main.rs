//! Mimecontrol CLI - Inspect and dry-run mimetype policies
//!
//! Usage:
//!   mimecontrol --data-dir /srv/data rules
//!   mimecontrol --policy rules.json check --path files/Photos/a.png
//!   mimecontrol check --path files/a.bin --mime application/x-msdownload --actor alice

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mimecontrol::policy::RuleMatcher;
use mimecontrol::{AccessGuard, InMemoryStorage, JsonFileRuleStore, MimeControlConfig, Principal};

/// Mimecontrol - mimetype access control for storage writes
#[derive(Parser, Debug)]
#[command(name = "mimecontrol")]
#[command(about = "Inspect and dry-run mimetype policies")]
struct Args {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the policy file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Policy file, overriding the data directory lookup
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide whether a write to a path would be allowed
    Check {
        /// Raw storage path, e.g. files/Photos/a.png
        #[arg(long)]
        path: String,

        /// Mimetype to assume instead of guessing from the extension
        #[arg(long)]
        mime: Option<String>,

        /// Account performing the write
        #[arg(long)]
        actor: Option<String>,

        /// Treat the storage as a user home storage
        #[arg(long)]
        home: bool,
    },
    /// Validate and list the policy rules
    Rules {
        /// Print the parsed policy as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Args {
    fn load_config(&self) -> anyhow::Result<MimeControlConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                MimeControlConfig::from_json(&json)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => MimeControlConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config = config.with_data_directory(dir);
        }
        if let Some(policy) = &self.policy {
            config = config.with_policy_file(policy);
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr so stdout stays parseable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = args.load_config()?;

    let ok = match args.command {
        Command::Check {
            path,
            mime,
            actor,
            home,
        } => check(&config, &path, mime, actor, home).await?,
        Command::Rules { json } => rules(&config, json)?,
    };
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Print the decision for `path`. Returns whether the write is allowed.
async fn check(
    config: &MimeControlConfig,
    path: &str,
    mime: Option<String>,
    actor: Option<String>,
    home: bool,
) -> anyhow::Result<bool> {
    let storage = if home {
        InMemoryStorage::home()
    } else {
        InMemoryStorage::new()
    };
    if let Some(mime) = mime {
        storage.set_mime_type(path, mime).await;
    }

    let guard = AccessGuard::from_config(config);
    let actor = actor.map(Principal::new);
    let decision = guard
        .evaluate(&storage, path, actor.as_ref())
        .await
        .with_context(|| format!("evaluating {path}"))?;

    let mimetype = decision.mimetype.as_deref().unwrap_or("-");
    if decision.is_allowed() {
        println!("allow\t{path}\t{mimetype}\t{}", decision.reason);
    } else {
        println!("deny\t{path}\t{mimetype}\t{}", decision.reason);
    }
    Ok(decision.is_allowed())
}

/// Print the policy rules. Returns false if any rule is malformed.
fn rules(config: &MimeControlConfig, json: bool) -> anyhow::Result<bool> {
    let store = JsonFileRuleStore::from_config(config);
    let policy = store
        .try_load()
        .with_context(|| format!("loading policy {}", store.path().display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&policy)?);
    } else {
        println!("denyrootbydefault\t{}", policy.deny_root_by_default);
        for (index, rule) in policy.rules.iter().enumerate() {
            println!("{index}\t{}\t{}", rule.path_pattern, rule.mime_pattern);
        }
    }

    let malformed = RuleMatcher::new().validate(&policy);
    for bad in &malformed {
        eprintln!(
            "rule {}: invalid pattern ({}): {}",
            bad.index, bad.rule.path_pattern, bad.error
        );
    }
    Ok(malformed.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mimecontrol.json");
        std::fs::write(
            &config_path,
            r#"{"data_directory": "/srv/data", "scan_streams": false}"#,
        )
        .unwrap();

        let args = Args::parse_from([
            "mimecontrol",
            "--config",
            config_path.to_str().unwrap(),
            "--policy",
            "/etc/rules.json",
            "rules",
        ]);
        let config = args.load_config().unwrap();

        assert_eq!(config.data_directory, PathBuf::from("/srv/data"));
        assert!(!config.scan_streams);
        assert_eq!(config.policy_path(), PathBuf::from("/etc/rules.json"));
    }

    #[tokio::test]
    async fn test_check_reports_decision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(mimecontrol::DEFAULT_CONFIG_FILENAME),
            r#"{"rules": [{"path": "Photos", "mime": "image/.*"}]}"#,
        )
        .unwrap();
        let config = MimeControlConfig::default().with_data_directory(dir.path());

        let allowed = check(&config, "files/Photos/a.png", None, None, true)
            .await
            .unwrap();
        assert!(allowed);

        let denied = check(
            &config,
            "files/Photos/a.bin",
            Some("application/octet-stream".to_string()),
            Some("alice".to_string()),
            true,
        )
        .await
        .unwrap();
        assert!(!denied);
    }

    #[test]
    fn test_rules_reports_malformed_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let policy = dir.path().join("rules.json");
        std::fs::write(&policy, r#"{"rules": [{"path": "(((", "mime": ".*"}]}"#).unwrap();
        let config = MimeControlConfig::default().with_policy_file(&policy);

        assert!(!rules(&config, false).unwrap());
    }

    #[test]
    fn test_rules_missing_policy_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = MimeControlConfig::default().with_policy_file(dir.path().join("absent.json"));

        assert!(rules(&config, true).is_err());
    }
}
