//! Target and artifact references
//!
//! A reference names a target (`+build`, `./sub/dir+test`,
//! `github.com/acme/widgets:v1.2+release`) or an artifact within a target
//! (`+build/out/bin`). The part before `+` identifies the project the target
//! lives in; its shape selects one of three origins:
//!
//! - empty: the caller's own project (`LocalInternal`)
//! - starting with `.` or `/`: another directory on disk (`LocalExternal`)
//! - anything else: a git-hosted project at an optional revision (`Remote`)
//!
//! Remote prefixes are split into repository identity and in-repo path by a
//! [`GitLookup`] registry. References are joined against a caller context
//! when one recipe refers into another, re-rooting local forms as needed.

use crate::domain::gitmatcher::GitLookup;
use crate::domain::paths;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefError {
    #[error("Invalid target ref {0}: expected a single '+'")]
    Syntax(String),
    #[error("Invalid target ref {0}: empty target name")]
    EmptyName(String),
    #[error("No git matcher accepts remote path {0}")]
    UnresolvedRemote(String),
    #[error("Absolute path {0} not supported as reference in remote context")]
    AbsolutePathInRemoteContext(String),
}

/// Where the referenced project lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The caller's own project; rendered with no prefix.
    LocalInternal,
    /// Another directory on the local filesystem.
    LocalExternal { local_path: String },
    /// A git-hosted project. An empty `tag` means the default branch.
    Remote {
        git_url: String,
        git_sub_path: String,
        tag: String,
    },
}

/// A parsed target or artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    origin: Origin,
    name: String,
}

impl Reference {
    /// Builds a reference for a target in the caller's own project.
    pub fn local_internal(name: &str) -> Self {
        Self {
            origin: Origin::LocalInternal,
            name: name.to_string(),
        }
    }

    /// Parses a reference string. Remote prefixes are resolved through the
    /// supplied matcher registry.
    pub fn parse(text: &str, lookup: &GitLookup) -> Result<Self, RefError> {
        let (prefix, name) = text
            .split_once('+')
            .ok_or_else(|| RefError::Syntax(text.to_string()))?;
        if name.is_empty() {
            return Err(RefError::EmptyName(text.to_string()));
        }
        let name = name.to_string();

        if prefix.is_empty() {
            return Ok(Self {
                origin: Origin::LocalInternal,
                name,
            });
        }

        if prefix.starts_with('.') || prefix.starts_with('/') {
            return Ok(Self {
                origin: Origin::LocalExternal {
                    local_path: normalize_local(prefix),
                },
                name,
            });
        }

        let (path, tag) = match prefix.split_once(':') {
            Some((path, tag)) => (path, tag.to_string()),
            None => (prefix, String::new()),
        };
        let (git_url, git_sub_path) = lookup
            .lookup(path)
            .ok_or_else(|| RefError::UnresolvedRemote(path.to_string()))?;
        Ok(Self {
            origin: Origin::Remote {
                git_url,
                git_sub_path,
                tag,
            },
            name,
        })
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// The full name part: the target, or `target/artifact-path` for an
    /// artifact reference.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The target component of the name.
    pub fn target(&self) -> &str {
        self.name.split('/').next().unwrap_or(&self.name)
    }

    /// The artifact path component, when this is an artifact reference.
    pub fn artifact_path(&self) -> Option<&str> {
        self.name.split_once('/').map(|(_, rest)| rest)
    }

    /// Replaces the name, keeping the project part. Used to refer to a
    /// sibling target within the same project.
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            origin: self.origin.clone(),
            name: name.to_string(),
        }
    }

    pub fn is_local_internal(&self) -> bool {
        self.origin == Origin::LocalInternal
    }

    pub fn is_local_external(&self) -> bool {
        matches!(self.origin, Origin::LocalExternal { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.origin, Origin::Remote { .. })
    }

    /// Canonical rendering, used for node identity and fingerprinting.
    /// Identical to `Display` on all origins; kept as a separate operation
    /// because identity must not drift if the display form ever does.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Canonical rendering of the project only, without the target name.
    /// This is the key under which recipes are loaded and cached.
    pub fn project_canonical(&self) -> String {
        match &self.origin {
            Origin::LocalInternal => String::new(),
            Origin::LocalExternal { local_path } => paths::base(local_path),
            Origin::Remote {
                git_url,
                git_sub_path,
                tag,
            } => {
                let mut out = git_url.clone();
                if !git_sub_path.is_empty() {
                    out.push('/');
                    out.push_str(git_sub_path);
                }
                if !tag.is_empty() {
                    out.push(':');
                    out.push_str(tag);
                }
                out
            }
        }
    }

    /// Reinterprets `other` relative to `self`. Local forms referenced from
    /// a remote caller become remote, inheriting the caller's repository and
    /// revision; local forms referenced from a local caller are re-rooted
    /// onto the caller's directory.
    pub fn join(&self, other: &Reference) -> Result<Reference, RefError> {
        let name = other.name.clone();
        match (&self.origin, &other.origin) {
            (
                Origin::Remote {
                    git_url,
                    git_sub_path,
                    tag,
                },
                Origin::LocalInternal,
            ) => Ok(Reference {
                origin: Origin::Remote {
                    git_url: git_url.clone(),
                    git_sub_path: git_sub_path.clone(),
                    tag: tag.clone(),
                },
                name,
            }),
            (
                Origin::Remote {
                    git_url,
                    git_sub_path,
                    tag,
                },
                Origin::LocalExternal { local_path },
            ) => {
                if paths::is_abs(local_path) {
                    return Err(RefError::AbsolutePathInRemoteContext(local_path.clone()));
                }
                Ok(Reference {
                    origin: Origin::Remote {
                        git_url: git_url.clone(),
                        git_sub_path: paths::join(git_sub_path, local_path),
                        tag: tag.clone(),
                    },
                    name,
                })
            }
            (_, Origin::Remote { .. }) => Ok(other.clone()),
            (caller_local, Origin::LocalInternal) => Ok(Reference {
                origin: caller_local.clone(),
                name,
            }),
            (caller_local, Origin::LocalExternal { local_path }) => {
                if paths::is_abs(local_path) {
                    return Ok(Reference {
                        origin: Origin::LocalExternal {
                            local_path: paths::clean(local_path),
                        },
                        name,
                    });
                }
                let caller_path = match caller_local {
                    Origin::LocalExternal { local_path } => local_path.as_str(),
                    _ => ".",
                };
                Ok(Reference {
                    origin: Origin::LocalExternal {
                        local_path: normalize_local(&paths::join(caller_path, local_path)),
                    },
                    name,
                })
            }
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Origin::LocalInternal => write!(f, "+{}", self.name),
            Origin::LocalExternal { local_path } => write!(f, "{}+{}", local_path, self.name),
            Origin::Remote {
                git_url,
                git_sub_path,
                tag,
            } => {
                write!(f, "{}", git_url)?;
                if !git_sub_path.is_empty() {
                    write!(f, "/{}", git_sub_path)?;
                }
                if !tag.is_empty() {
                    write!(f, ":{}", tag)?;
                }
                write!(f, "+{}", self.name)
            }
        }
    }
}

/// Path-cleans a local prefix and re-applies the `./` convention for
/// relative forms.
fn normalize_local(path: &str) -> String {
    if paths::is_abs(path) {
        return paths::clean(path);
    }
    let cleaned = paths::clean(path);
    if cleaned.starts_with('.') {
        cleaned
    } else {
        format!("./{}", cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> GitLookup {
        GitLookup::with_defaults()
    }

    #[test]
    fn parse_local_internal() {
        let r = Reference::parse("+build", &lookup()).unwrap();
        assert_eq!(*r.origin(), Origin::LocalInternal);
        assert_eq!(r.name(), "build");
        assert_eq!(r.to_string(), "+build");
    }

    #[test]
    fn parse_local_external() {
        let r = Reference::parse("./sub/dir+test", &lookup()).unwrap();
        assert_eq!(
            *r.origin(),
            Origin::LocalExternal {
                local_path: "./sub/dir".to_string()
            }
        );
        assert_eq!(r.to_string(), "./sub/dir+test");
    }

    #[test]
    fn parse_local_external_normalizes() {
        let r = Reference::parse("./sub/../other+t", &lookup()).unwrap();
        assert_eq!(r.to_string(), "./other+t");
        let r = Reference::parse("/a/../b+t", &lookup()).unwrap();
        assert_eq!(r.to_string(), "/b+t");
    }

    #[test]
    fn parse_remote_with_tag() {
        let r = Reference::parse("github.com/acme/widgets:v1.2+release", &lookup()).unwrap();
        assert_eq!(
            *r.origin(),
            Origin::Remote {
                git_url: "github.com/acme/widgets".to_string(),
                git_sub_path: String::new(),
                tag: "v1.2".to_string(),
            }
        );
        assert_eq!(r.canonical(), "github.com/acme/widgets:v1.2+release");
    }

    #[test]
    fn parse_remote_sub_path() {
        let r = Reference::parse("github.com/acme/widgets/examples/go+t", &lookup()).unwrap();
        assert_eq!(r.to_string(), "github.com/acme/widgets/examples/go+t");
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            Reference::parse("build", &lookup()).unwrap_err(),
            RefError::Syntax("build".to_string())
        );
        assert_eq!(
            Reference::parse("+", &lookup()).unwrap_err(),
            RefError::EmptyName("+".to_string())
        );
        assert!(matches!(
            Reference::parse("example.org/a/b+t", &lookup()).unwrap_err(),
            RefError::UnresolvedRemote(_)
        ));
    }

    #[test]
    fn canonical_is_idempotent() {
        for text in [
            "+build",
            "./sub/dir+test",
            "github.com/acme/widgets:v1.2+release",
        ] {
            let r = Reference::parse(text, &lookup()).unwrap();
            let once = r.canonical();
            let again = Reference::parse(&once, &lookup()).unwrap().canonical();
            assert_eq!(once, again);
        }
    }

    #[test]
    fn artifact_name_splits() {
        let r = Reference::parse("+build/out/bin", &lookup()).unwrap();
        assert_eq!(r.target(), "build");
        assert_eq!(r.artifact_path(), Some("out/bin"));
        let r = Reference::parse("+build", &lookup()).unwrap();
        assert_eq!(r.artifact_path(), None);
    }

    #[test]
    fn join_remote_caller_external_ref() {
        let caller =
            Reference::parse("github.com/acme/widgets/examples/go:main+base", &lookup()).unwrap();
        let r = Reference::parse("./sub+t", &lookup()).unwrap();
        let joined = caller.join(&r).unwrap();
        assert_eq!(
            *joined.origin(),
            Origin::Remote {
                git_url: "github.com/acme/widgets".to_string(),
                git_sub_path: "examples/go/sub".to_string(),
                tag: "main".to_string(),
            }
        );
        assert_eq!(joined.name(), "t");
    }

    #[test]
    fn join_remote_caller_rejects_absolute() {
        let caller = Reference::parse("github.com/acme/widgets:main+base", &lookup()).unwrap();
        let r = Reference::parse("/abs/path+t", &lookup()).unwrap();
        assert!(matches!(
            caller.join(&r).unwrap_err(),
            RefError::AbsolutePathInRemoteContext(_)
        ));
    }

    #[test]
    fn join_remote_caller_internal_ref_inherits_repo() {
        let caller =
            Reference::parse("github.com/acme/widgets/examples/go:main+base", &lookup()).unwrap();
        let r = Reference::parse("+t", &lookup()).unwrap();
        let joined = caller.join(&r).unwrap();
        assert_eq!(
            joined.to_string(),
            "github.com/acme/widgets/examples/go:main+t"
        );
    }

    #[test]
    fn join_local_caller_relative_ref() {
        let caller = Reference::parse("./sub+base", &lookup()).unwrap();
        let r = Reference::parse("./dir+t", &lookup()).unwrap();
        assert_eq!(caller.join(&r).unwrap().to_string(), "./sub/dir+t");
    }

    #[test]
    fn join_local_internal_caller_keeps_internal() {
        let caller = Reference::local_internal("base");
        let r = Reference::parse("+t", &lookup()).unwrap();
        let joined = caller.join(&r).unwrap();
        assert!(joined.is_local_internal());
        assert_eq!(joined.to_string(), "+t");
    }

    #[test]
    fn join_local_caller_remote_ref_unchanged() {
        let caller = Reference::parse("./sub+base", &lookup()).unwrap();
        let r = Reference::parse("github.com/acme/widgets+t", &lookup()).unwrap();
        assert_eq!(caller.join(&r).unwrap(), r);
    }

    #[test]
    fn project_canonical_forms() {
        let r = Reference::parse("github.com/acme/widgets/examples/go:main+t", &lookup()).unwrap();
        assert_eq!(r.project_canonical(), "github.com/acme/widgets/examples/go:main");
        let r = Reference::parse("+t", &lookup()).unwrap();
        assert_eq!(r.project_canonical(), "");
        let r = Reference::parse("./sub/dir+t", &lookup()).unwrap();
        assert_eq!(r.project_canonical(), "dir");
    }
}
