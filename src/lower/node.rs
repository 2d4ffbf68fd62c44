//! Build-graph node types and cache fingerprinting
//!
//! A lowered target becomes one `BuildNode`: an identity, a content
//! fingerprint, the dependency edges, the ordered effect list, and the
//! declared outputs. Nodes serialize to stable JSON records for the
//! downstream executor.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// How an effect interacts with the build cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheClass {
    /// Configuration only; no observable side effect.
    Pure,
    /// Mutates the build filesystem.
    FilesystemWrite,
    /// Reaches outside the build sandbox.
    Network,
    /// Runs on the host; the executor must not containerize it.
    Local,
}

/// One lowered command with its resolved argument vector.
#[derive(Debug, Clone, Serialize)]
pub struct Effect {
    pub opcode: String,
    pub args: Vec<String>,
    pub cache_class: CacheClass,
}

/// A declared output of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    Artifact { path: String },
    Image { tag: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildNode {
    /// Canonical-rendered target reference.
    pub id: String,
    pub fingerprint_hex: String,
    /// Canonical references of dependency nodes, sorted.
    pub deps: Vec<String>,
    pub effects: Vec<Effect>,
    /// Effects gated on push mode. Excluded from the fingerprint.
    pub push_effects: Vec<Effect>,
    pub outputs: Vec<Output>,
}

/// Incremental sha-256 over the fingerprint inputs. Every field is
/// length-prefixed so adjacent inputs cannot collide by concatenation.
pub struct Fingerprinter {
    hasher: Sha256,
}

impl Fingerprinter {
    pub fn new(canonical_ref: &str) -> Self {
        let mut f = Self {
            hasher: Sha256::new(),
        };
        f.field(canonical_ref);
        f
    }

    fn field(&mut self, data: &str) {
        self.hasher.update((data.len() as u64).to_le_bytes());
        self.hasher.update(data.as_bytes());
    }

    /// Feeds the resolved base: a dependency fingerprint for target bases,
    /// or the image name (with digest when known) otherwise.
    pub fn base(&mut self, descriptor: &str) {
        self.field(descriptor);
    }

    pub fn effect(&mut self, effect: &Effect) {
        self.field(&effect.opcode);
        self.hasher.update((effect.args.len() as u64).to_le_bytes());
        for arg in &effect.args {
            self.field(arg);
        }
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(opcode: &str, args: &[&str]) -> Effect {
        Effect {
            opcode: opcode.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cache_class: CacheClass::FilesystemWrite,
        }
    }

    #[test]
    fn same_inputs_same_fingerprint() {
        let run = |args: &[&str]| {
            let mut f = Fingerprinter::new("+build");
            f.base("alpine:3.20@sha256:abcd");
            f.effect(&effect("RUN", args));
            f.finish()
        };
        assert_eq!(run(&["make", "all"]), run(&["make", "all"]));
        assert_ne!(run(&["make", "all"]), run(&["make", "test"]));
    }

    #[test]
    fn argument_boundaries_matter() {
        let run = |args: &[&str]| {
            let mut f = Fingerprinter::new("+build");
            f.base("alpine");
            f.effect(&effect("RUN", args));
            f.finish()
        };
        assert_ne!(run(&["ab", "c"]), run(&["a", "bc"]));
    }

    #[test]
    fn base_digest_changes_fingerprint() {
        let run = |base: &str| {
            let mut f = Fingerprinter::new("+build");
            f.base(base);
            f.finish()
        };
        assert_ne!(run("alpine:3.20@sha256:aa"), run("alpine:3.20@sha256:bb"));
    }

    #[test]
    fn node_serializes_to_stable_record() {
        let node = BuildNode {
            id: "+build".to_string(),
            fingerprint_hex: "00ff".to_string(),
            deps: vec!["+base".to_string()],
            effects: vec![effect("RUN", &["make"])],
            push_effects: vec![],
            outputs: vec![Output::Image {
                tag: "img:latest".to_string(),
            }],
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], "+build");
        assert_eq!(json["effects"][0]["cache_class"], "filesystem_write");
        assert_eq!(json["outputs"][0]["type"], "image");
    }
}
