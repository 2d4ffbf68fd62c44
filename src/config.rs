//! Configuration management for kiln
//!
//! Loads settings from environment variables with sensible defaults,
//! builds the git-origin matcher registry, and reads `.env` fallback values
//! for build args.
//!
//! # Environment Variables
//!
//! - `KILN_LOG_LEVEL`: Logging level - default: "info"
//! - `KILN_FILE`: Recipe file name - default: "Kilnfile"
//! - `KILN_PUSH`: Default push mode (true|false) - default: "false"
//! - `KILN_GIT_URL_INSTEAD_OF`: Clone-URL rewrite pairs, comma separated,
//!   each `base=instead-of` (mirrors git's `url.<base>.insteadOf`)
//! - `SSH_AUTH_SOCK`: When absent, `auto` auth entries fall back to https
//! - `TERM`: Made visible to ARG substitution in lowered effects

use crate::domain::{AuthProtocol, GitLookup, MatcherError};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_RECIPE_FILE: &str = "Kilnfile";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Valid options are: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
    #[error("Invalid git entry {name}: {source}")]
    InvalidGitEntry { name: String, source: MatcherError },
    #[error("Invalid instead-of rule {0}: expected base=instead-of")]
    InvalidInsteadOf(String),
}

/// One configured git-origin entry, keyed by a short name. An empty
/// pattern synthesizes `<host>.com/[^/]+/[^/]+` from the key; an empty
/// suffix defaults to `.git`.
#[derive(Debug, Clone, Default)]
pub struct GitEntry {
    pub name: String,
    pub pattern: String,
    pub substitute: String,
    pub user: String,
    pub password: String,
    pub suffix: String,
    pub auth: String,
    pub keyscan_host: String,
}

#[derive(Debug, Clone)]
pub struct KilnConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Recipe file name looked up in each project directory.
    pub recipe_file: String,
    /// Default push mode.
    pub push: bool,
    /// Additional git-origin entries beyond the well-known hosts.
    pub git_entries: Vec<GitEntry>,
    /// Clone-URL rewrite pairs `(base, instead_of)`.
    pub url_instead_of: Vec<(String, String)>,
}

impl Default for KilnConfig {
    /// Loads configuration from `KILN_*` environment variables, falling
    /// back to defaults for anything missing.
    fn default() -> Self {
        let log_level = env::var("KILN_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();
        let recipe_file =
            env::var("KILN_FILE").unwrap_or_else(|_| DEFAULT_RECIPE_FILE.to_string());
        let push = env::var("KILN_PUSH")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);
        let url_instead_of = env::var("KILN_GIT_URL_INSTEAD_OF")
            .ok()
            .map(|raw| parse_instead_of(&raw).unwrap_or_default())
            .unwrap_or_default();

        Self {
            log_level,
            recipe_file,
            push,
            git_entries: Vec::new(),
            url_instead_of,
        }
    }
}

impl KilnConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }

    /// Builds the matcher registry: well-known hosts first, then the
    /// configured entries in order, then the rewrite rules. When no
    /// ssh-agent socket is present, every `auto` entry resolves to https.
    pub fn build_git_lookup(&self) -> Result<GitLookup, ConfigError> {
        let mut lookup = GitLookup::with_defaults();
        if !has_ssh_agent() {
            warn!("no ssh auth socket detected; falling back to https for auto auth values");
            lookup.disable_ssh();
        }

        for entry in &self.git_entries {
            if matches!(entry.name.as_str(), "github" | "gitlab" | "bitbucket") {
                warn!(
                    "git configuration for {:?} found, did you mean {:?}?",
                    entry.name,
                    format!("{}.com", entry.name)
                );
            }
            let pattern = if entry.pattern.is_empty() {
                let mut host = entry.name.clone();
                if !host.contains('.') {
                    host.push_str(".com");
                }
                format!("{}/[^/]+/[^/]+", regex::escape(&host))
            } else {
                entry.pattern.clone()
            };
            let suffix = if entry.suffix.is_empty() {
                ".git"
            } else {
                entry.suffix.as_str()
            };
            let auth = AuthProtocol::parse(&entry.auth).unwrap_or(AuthProtocol::Auto);
            let auth = match auth {
                AuthProtocol::Auto => {
                    if has_ssh_agent() {
                        AuthProtocol::Ssh
                    } else {
                        AuthProtocol::Https
                    }
                }
                fixed => fixed,
            };
            lookup
                .add_matcher(
                    &entry.name,
                    &pattern,
                    some_nonempty(&entry.substitute),
                    if entry.user.is_empty() {
                        "git"
                    } else {
                        entry.user.as_str()
                    },
                    some_nonempty(&entry.password),
                    suffix,
                    auth,
                    some_nonempty(&entry.keyscan_host),
                )
                .map_err(|source| ConfigError::InvalidGitEntry {
                    name: entry.name.clone(),
                    source,
                })?;
        }

        for (base, instead_of) in &self.url_instead_of {
            lookup.add_instead_of(base, instead_of);
        }
        Ok(lookup)
    }
}

fn some_nonempty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn has_ssh_agent() -> bool {
    env::var_os("SSH_AUTH_SOCK").map_or(false, |v| !v.is_empty())
}

/// Parses `base=instead-of[,base=instead-of...]`.
pub fn parse_instead_of(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut out = Vec::new();
    for rule in raw.split(',').filter(|r| !r.trim().is_empty()) {
        let (base, instead_of) = rule
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidInsteadOf(rule.to_string()))?;
        out.push((base.trim().to_string(), instead_of.trim().to_string()));
    }
    Ok(out)
}

/// Reads a `.env` file into a map. Blank lines and `#` comments are
/// skipped; values may be single- or double-quoted. A missing file is an
/// empty map.
pub fn load_dotenv(path: &Path) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Ok(content) = fs::read_to_string(path) else {
        return out;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let mut value = value.trim();
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            out.insert(key.to_string(), value.to_string());
        }
    }
    out
}

/// Splits CLI `K[=V]` build args. A bare key reads the process
/// environment; an unset variable is an error, mirroring secret handling.
pub fn parse_build_args(raw: &[String]) -> Result<HashMap<String, String>, String> {
    let mut out = HashMap::new();
    for arg in raw {
        match arg.split_once('=') {
            Some((key, value)) => {
                out.insert(key.to_string(), value.to_string());
            }
            None => match env::var(arg) {
                Ok(value) => {
                    out.insert(arg.clone(), value);
                }
                Err(_) => return Err(format!("env var {} not set", arg)),
            },
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn plain_config() -> KilnConfig {
        KilnConfig {
            log_level: "info".to_string(),
            recipe_file: DEFAULT_RECIPE_FILE.to_string(),
            push: false,
            git_entries: Vec::new(),
            url_instead_of: Vec::new(),
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(plain_config().validate().is_ok());
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = plain_config();
        config.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn git_entry_without_pattern_synthesizes_host() {
        let mut config = plain_config();
        config.git_entries.push(GitEntry {
            name: "example".to_string(),
            ..GitEntry::default()
        });
        let lookup = config.build_git_lookup().unwrap();
        let (url, sub) = lookup.lookup("example.com/acme/widgets/deep").unwrap();
        assert_eq!(url, "example.com/acme/widgets");
        assert_eq!(sub, "deep");
    }

    #[test]
    fn instead_of_rules_parse() {
        let rules =
            parse_instead_of("https://github.com/=git@github.com:,https://a/=ssh://b/").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].0, "https://github.com/");
        assert!(parse_instead_of("no-equals-here").is_err());
    }

    #[test]
    fn dotenv_parses_quotes_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "PLAIN=value").unwrap();
        writeln!(f, "QUOTED=\"a b\"").unwrap();
        writeln!(f, "SINGLE='c d'").unwrap();
        writeln!(f).unwrap();
        let map = load_dotenv(&path);
        assert_eq!(map["PLAIN"], "value");
        assert_eq!(map["QUOTED"], "a b");
        assert_eq!(map["SINGLE"], "c d");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn missing_dotenv_is_empty() {
        assert!(load_dotenv(Path::new("/nonexistent/.env")).is_empty());
    }

    #[test]
    fn build_args_split_key_value() {
        let args = parse_build_args(&["K=V".to_string(), "X=a=b".to_string()]).unwrap();
        assert_eq!(args["K"], "V");
        assert_eq!(args["X"], "a=b");
    }

    #[test]
    fn bare_build_arg_requires_env() {
        let err = parse_build_args(&["KILN_DEFINITELY_UNSET_VAR".to_string()]).unwrap_err();
        assert!(err.contains("not set"));
    }
}
