//! Remote-origin matching for target references
//!
//! A remote reference prefix such as `github.com/acme/widgets/examples/go`
//! must be split into the repository identity (`github.com/acme/widgets`)
//! and the path of the recipe within it (`examples/go`). The split is driven
//! by an ordered registry of regex matchers, consulted in declaration order;
//! the first match wins. The registry also knows how to render a clone URL
//! for a matched repository (ssh or https form) and applies the global
//! `instead_of` rewrite pairs, mirroring git's `url.<base>.insteadOf`.

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("Invalid matcher pattern {pattern}: {source}")]
    InvalidPattern { pattern: String, source: regex::Error },
    #[error("No git matcher accepts {0}")]
    NoMatch(String),
}

/// Authentication protocol for cloning a matched repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProtocol {
    Ssh,
    Https,
    /// Resolved at registration time: ssh when an ssh-agent is available,
    /// https otherwise.
    Auto,
}

impl AuthProtocol {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ssh" => Some(Self::Ssh),
            "https" => Some(Self::Https),
            "auto" | "" => Some(Self::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct GitMatcher {
    name: String,
    pattern: Regex,
    user: String,
    password: Option<String>,
    substitute: Option<String>,
    suffix: String,
    auth: AuthProtocol,
    #[allow(dead_code)]
    keyscan_host: Option<String>,
}

/// Ordered registry of remote-origin matchers.
#[derive(Debug, Default)]
pub struct GitLookup {
    matchers: Vec<GitMatcher>,
    instead_of: Vec<(String, String)>,
    ssh_disabled: bool,
}

impl GitLookup {
    /// An empty registry with no matchers configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the well-known public hosts.
    pub fn with_defaults() -> Self {
        let mut lookup = Self::new();
        for host in ["github.com", "gitlab.com", "bitbucket.com"] {
            lookup
                .add_matcher(
                    host,
                    &format!("{}/[^/]+/[^/]+", regex::escape(host)),
                    None,
                    "git",
                    None,
                    ".git",
                    AuthProtocol::Auto,
                    None,
                )
                .expect("default matcher pattern is valid");
        }
        lookup
    }

    /// Registers a matcher. Order of registration is lookup order.
    #[allow(clippy::too_many_arguments)]
    pub fn add_matcher(
        &mut self,
        name: &str,
        pattern: &str,
        substitute: Option<&str>,
        user: &str,
        password: Option<&str>,
        suffix: &str,
        auth: AuthProtocol,
        keyscan_host: Option<&str>,
    ) -> Result<(), MatcherError> {
        let anchored = format!("^(?:{})", pattern);
        let compiled = Regex::new(&anchored).map_err(|source| MatcherError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let auth = if self.ssh_disabled && auth != AuthProtocol::Https {
            AuthProtocol::Https
        } else {
            auth
        };
        self.matchers.push(GitMatcher {
            name: name.to_string(),
            pattern: compiled,
            user: user.to_string(),
            password: password.map(str::to_string),
            substitute: substitute.filter(|s| !s.is_empty()).map(str::to_string),
            suffix: suffix.to_string(),
            auth,
            keyscan_host: keyscan_host.filter(|s| !s.is_empty()).map(str::to_string),
        });
        Ok(())
    }

    /// Forces https auth on every entry, present and future. Used when no
    /// ssh-agent socket is detected.
    pub fn disable_ssh(&mut self) {
        self.ssh_disabled = true;
        for m in &mut self.matchers {
            m.auth = AuthProtocol::Https;
        }
    }

    /// Adds a clone-URL rewrite pair: a rendered URL starting with `base`
    /// has that prefix replaced by `instead_of`.
    pub fn add_instead_of(&mut self, base: &str, instead_of: &str) {
        self.instead_of
            .push((base.to_string(), instead_of.to_string()));
    }

    /// Splits a remote reference prefix into `(git_url, sub_path)`.
    /// Returns `None` when no matcher accepts the prefix.
    pub fn lookup(&self, prefix: &str) -> Option<(String, String)> {
        for m in &self.matchers {
            if let Some(found) = m.pattern.find(prefix) {
                let git_url = found.as_str().to_string();
                let sub_path = prefix[found.end()..].trim_start_matches('/').to_string();
                tracing::debug!(matcher = %m.name, %git_url, %sub_path, "matched remote prefix");
                return Some((git_url, sub_path));
            }
        }
        None
    }

    /// Renders the clone address for a matched repository identity and
    /// applies the configured rewrite pairs.
    pub fn clone_url(&self, git_url: &str) -> Result<String, MatcherError> {
        let m = self
            .matchers
            .iter()
            .find(|m| m.pattern.is_match(git_url))
            .ok_or_else(|| MatcherError::NoMatch(git_url.to_string()))?;

        let rendered = if let Some(sub) = &m.substitute {
            sub.clone()
        } else {
            let (host, repo_path) = match git_url.split_once('/') {
                Some((h, p)) => (h, p),
                None => (git_url, ""),
            };
            let auth = if self.ssh_disabled { AuthProtocol::Https } else { m.auth };
            match auth {
                AuthProtocol::Https => match (&m.password, m.user.is_empty()) {
                    (Some(password), false) => format!(
                        "https://{}:{}@{}/{}{}",
                        m.user, password, host, repo_path, m.suffix
                    ),
                    (None, false) if m.user != "git" => {
                        format!("https://{}@{}/{}{}", m.user, host, repo_path, m.suffix)
                    }
                    _ => format!("https://{}/{}{}", host, repo_path, m.suffix),
                },
                // Auto resolves at registration; ssh is the remaining case.
                _ => format!("{}@{}:{}{}", m.user, host, repo_path, m.suffix),
            }
        };

        Ok(self.rewrite(rendered))
    }

    fn rewrite(&self, url: String) -> String {
        for (base, instead_of) in &self.instead_of {
            if let Some(rest) = url.strip_prefix(base.as_str()) {
                return format!("{}{}", instead_of, rest);
            }
        }
        url
    }
}
