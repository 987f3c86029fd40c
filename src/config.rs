use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::reconcile::{FailurePolicy, Policies};

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Base URL of the task API, without the `/api` suffix
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// What a failed update does to the local list: "commit" keeps the
    /// optimistic value, "rollback" restores the last confirmed one.
    #[serde(default)]
    pub on_update_failure: FailurePolicy,
    /// Same choice for a failed delete.
    #[serde(default)]
    pub on_delete_failure: FailurePolicy,
    /// Where the auth token is kept. Defaults to the data dir.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

fn default_endpoint() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
            on_update_failure: FailurePolicy::default(),
            on_delete_failure: FailurePolicy::default(),
            credentials_path: None,
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Which profile to use when none is specified
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl ConfigFile {
    /// Load from disk, or return a default config if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        write_default_at(&path)?;
        Ok(path)
    }

    /// Resolve the active profile given an optional override name.
    pub fn resolve_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let key = name.unwrap_or(&self.default_profile);
        self.profiles.get(key)
    }
}

fn write_default_at(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("Failed to write config file at {}", path.display()))
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub request_timeout: Duration,
    pub policies: Policies,
    pub credentials_path: PathBuf,
    /// Profile name that was resolved (for display)
    pub profile_name: String,
}

impl ResolvedConfig {
    /// Merge config file profile with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file profile > built-in defaults
    pub fn resolve(
        file: &ConfigFile,
        profile_override: Option<&str>,
        endpoint_override: Option<&str>,
    ) -> Self {
        let profile_name = profile_override
            .unwrap_or(&file.default_profile)
            .to_string();

        let base = file
            .resolve_profile(profile_override)
            .cloned()
            .unwrap_or_default();

        Self {
            endpoint: endpoint_override
                .map(str::to_string)
                .unwrap_or(base.endpoint),
            request_timeout: Duration::from_secs(base.request_timeout_secs.max(1)),
            policies: Policies {
                update: base.on_update_failure,
                delete: base.on_delete_failure,
            },
            credentials_path: base
                .credentials_path
                .unwrap_or_else(|| data_dir().join("credentials.json")),
            profile_name,
        }
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("todosync")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

/// `$XDG_DATA_HOME/todosync`, or `~/.local/share/todosync`.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            PathBuf::from(std::env::var("HOME").unwrap_or_default()).join(".local/share")
        })
        .join("todosync")
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# todosync configuration
# Run `todosync --init` to regenerate this file.

default_profile = "local"

# ── Local development server (default) ───────────────────────────────────────
[profiles.local]
endpoint             = "http://localhost:8000"
request_timeout_secs = 15

# What happens to the local list when the server rejects a change:
#   "commit"   keep showing the change (the server may disagree until reload)
#   "rollback" restore the last confirmed version
on_update_failure = "commit"
on_delete_failure = "commit"

# credentials_path = "/home/me/.local/share/todosync/credentials.json"

# ── Hosted deployment ────────────────────────────────────────────────────────
# [profiles.hosted]
# endpoint             = "https://todo.example.com"
# request_timeout_secs = 30
# on_update_failure    = "rollback"
# on_delete_failure    = "rollback"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_parses() {
        let file: ConfigFile = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(file.default_profile, "local");
        let local = file.resolve_profile(None).unwrap();
        assert_eq!(local.endpoint, "http://localhost:8000");
        assert_eq!(local.on_update_failure, FailurePolicy::Commit);
    }

    #[test]
    fn test_profile_defaults_fill_gaps() {
        let file: ConfigFile = toml::from_str(
            r#"
            default_profile = "work"
            [profiles.work]
            on_delete_failure = "rollback"
            "#,
        )
        .unwrap();
        let work = file.resolve_profile(None).unwrap();
        assert_eq!(work.endpoint, "http://localhost:8000");
        assert_eq!(work.request_timeout_secs, 15);
        assert_eq!(work.on_update_failure, FailurePolicy::Commit);
        assert_eq!(work.on_delete_failure, FailurePolicy::Rollback);
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let parsed: Result<ConfigFile, _> = toml::from_str(
            r#"
            [profiles.default]
            on_update_failure = "retry"
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_resolve_precedence() {
        let file: ConfigFile = toml::from_str(
            r#"
            [profiles.default]
            endpoint = "http://file:1"
            request_timeout_secs = 3
            on_update_failure = "rollback"
            credentials_path = "/tmp/creds.json"

            [profiles.other]
            endpoint = "http://other:2"
            "#,
        )
        .unwrap();

        let cfg = ResolvedConfig::resolve(&file, None, None);
        assert_eq!(cfg.profile_name, "default");
        assert_eq!(cfg.endpoint, "http://file:1");
        assert_eq!(cfg.request_timeout, Duration::from_secs(3));
        assert_eq!(cfg.policies.update, FailurePolicy::Rollback);
        assert_eq!(cfg.policies.delete, FailurePolicy::Commit);
        assert_eq!(cfg.credentials_path, PathBuf::from("/tmp/creds.json"));

        let cfg = ResolvedConfig::resolve(&file, Some("other"), Some("http://cli:3"));
        assert_eq!(cfg.profile_name, "other");
        assert_eq!(cfg.endpoint, "http://cli:3");
        assert_eq!(cfg.request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_missing_profile_uses_builtin_defaults() {
        let cfg = ResolvedConfig::resolve(&ConfigFile::default(), Some("nope"), None);
        assert_eq!(cfg.endpoint, "http://localhost:8000");
        assert_eq!(cfg.policies, Policies::default());
        assert!(cfg.credentials_path.ends_with("todosync/credentials.json"));
    }

    #[test]
    fn test_load_from_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(file.profiles.is_empty());
    }

    #[test]
    fn test_write_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        write_default_at(&path).unwrap();
        let file = ConfigFile::load_from(&path).unwrap();
        assert!(file.profiles.contains_key("local"));

        // Existing files are left alone
        fs::write(&path, "default_profile = \"mine\"\n").unwrap();
        write_default_at(&path).unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap().default_profile, "mine");
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "profiles = 3").unwrap();
        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(format!("{err}").contains("config.toml"));
    }
}
