//! Declarative configuration for the validators.
//!
//! Whitelist rules are defined in `.json` files, one rule per file, loaded
//! once at startup from a rules directory. This keeps the set of permitted
//! commands out of code and under review like any other policy artifact.
//! A [`GuardConfig`] bundles the construction-time settings shared by the
//! path validators for callers that configure the whole layer from one file.
//!
//! Loading is tolerant of individual bad files (they are logged and skipped)
//! but strict about semantics: a rule that parses but carries an invalid
//! argument regex fails whitelist construction outright.

use crate::symlink_resolver::SymlinkPolicy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One whitelist entry: a base command and the shapes it may be invoked with.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CommandRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When present, the first argument must be one of these.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcommands: Option<Vec<String>>,
    /// When present, every argument (after the subcommand, if restricted)
    /// must match at least one of these regexes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_arg_patterns: Option<Vec<String>>,
    /// Override for the per-invocation timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl CommandRule {
    /// A permissive rule for `name`: any subcommand, any argument shape.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            subcommands: None,
            allowed_arg_patterns: None,
            timeout_seconds: None,
            enabled: true,
        }
    }
}

/// Construction-time settings for the path validators, loadable from JSON.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    pub base_dir: PathBuf,
    #[serde(default)]
    pub allowed_dirs: Vec<PathBuf>,
    /// Defaults to the platform's filesystem case behavior when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_insensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_path_length: Option<usize>,
    #[serde(default)]
    pub symlink_policy: SymlinkPolicy,
    #[serde(default = "default_strict_mode")]
    pub strict_mode: bool,
    #[serde(default = "default_actor")]
    pub actor: String,
}

impl GuardConfig {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GuardConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Builds the canonical boundary this config describes.
    pub fn boundary(&self) -> anyhow::Result<crate::boundary::SecurityBoundary> {
        let mut boundary = crate::boundary::SecurityBoundary::new(&self.base_dir)?;
        for dir in &self.allowed_dirs {
            boundary = boundary.with_allowed_dir(dir)?;
        }
        if let Some(ci) = self.case_insensitive {
            boundary = boundary.with_case_insensitive(ci);
        }
        if let Some(max) = self.max_path_length {
            boundary = boundary.with_max_path_length(max);
        }
        Ok(boundary)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_strict_mode() -> bool {
    true
}

fn default_actor() -> String {
    crate::constants::DEFAULT_ACTOR.to_string()
}

/// Loads every rule from the `.json` files in `rules_dir`, keyed by command
/// name. A missing directory yields an empty map; an unreadable or
/// unparsable file is logged and skipped; a disabled rule is dropped.
pub fn load_command_rules(rules_dir: &Path) -> anyhow::Result<HashMap<String, CommandRule>> {
    if !rules_dir.exists() {
        return Ok(HashMap::new());
    }

    let mut rules = HashMap::new();

    for entry in std::fs::read_dir(rules_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<CommandRule>(&contents) {
                Ok(rule) => {
                    if rule.enabled {
                        rules.insert(rule.name.clone(), rule);
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to parse {}: {}", path.display(), e);
                }
            },
            Err(e) => {
                tracing::warn!("failed to read {}: {}", path.display(), e);
            }
        }
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    #[test]
    fn loads_rules_from_directory() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(
            dir.path().join("git.json"),
            r#"{"name": "git", "subcommands": ["status", "diff"]}"#,
        )?;
        std::fs::write(
            dir.path().join("disabled.json"),
            r#"{"name": "rm", "enabled": false}"#,
        )?;
        std::fs::write(dir.path().join("notes.txt"), "not a rule")?;
        std::fs::write(dir.path().join("broken.json"), "{nope")?;

        let rules = load_command_rules(dir.path())?;
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules["git"].subcommands.as_deref(),
            Some(&["status".to_string(), "diff".to_string()][..])
        );
        Ok(())
    }

    #[test]
    fn missing_directory_yields_empty_map() -> Result<()> {
        let dir = TempDir::new()?;
        let rules = load_command_rules(&dir.path().join("nope"))?;
        assert!(rules.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_str::<CommandRule>(r#"{"name": "git", "surprise": 1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn guard_config_builds_boundary() -> Result<()> {
        let temp = TempDir::new()?;
        let config: GuardConfig = serde_json::from_str(&format!(
            r#"{{"base_dir": {:?}, "symlink_policy": "deny", "max_path_length": 1024}}"#,
            temp.path().to_string_lossy()
        ))?;
        assert_eq!(config.symlink_policy, SymlinkPolicy::Deny);
        assert!(config.strict_mode);
        let boundary = config.boundary()?;
        assert_eq!(boundary.max_path_length(), 1024);
        Ok(())
    }
}
