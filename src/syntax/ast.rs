//! Recipe AST
//!
//! Produced by the parser, consumed without mutation by lowering. The types
//! serialize to JSON for the `parse` debug surface.

use serde::Serialize;

/// A parsed recipe: the file-level preamble (commands before any target)
/// plus the ordered target definitions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Recipe {
    pub base_block: Vec<Command>,
    pub targets: Vec<TargetDef>,
}

impl Recipe {
    pub fn target(&self, name: &str) -> Option<&TargetDef> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// True when the file contained no commands and no targets.
    pub fn is_empty(&self) -> bool {
        self.base_block.is_empty() && self.targets.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetDef {
    pub name: String,
    pub commands: Vec<Command>,
    pub line: usize,
    pub column: usize,
}

/// A flag value: bare flags are booleans, `--flag=value` is a string, and
/// repeatable flags accumulate into a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Serialize)]
pub struct Command {
    /// Canonical opcode, sub-opcode included (`FROM DOCKERFILE`,
    /// `SAVE ARTIFACT`, ...).
    pub opcode: String,
    /// Flags in source order.
    pub flags: Vec<(String, FlagValue)>,
    /// Positional arguments in source order.
    pub args: Vec<String>,
    /// Verbatim here-document body, when the command carried one.
    pub heredoc: Option<String>,
    pub line: usize,
    pub column: usize,
}

impl Command {
    pub fn flag(&self, name: &str) -> Option<&FlagValue> {
        self.flags
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// True for a bare flag or an explicit `--flag=true`.
    pub fn has_flag(&self, name: &str) -> bool {
        match self.flag(name) {
            Some(FlagValue::Bool(b)) => *b,
            Some(FlagValue::Str(s)) => s == "true",
            Some(FlagValue::List(_)) => true,
            None => false,
        }
    }

    /// All values of a repeatable flag, empty when absent.
    pub fn flag_values(&self, name: &str) -> Vec<&str> {
        match self.flag(name) {
            Some(FlagValue::Str(s)) => vec![s.as_str()],
            Some(FlagValue::List(values)) => values.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}
