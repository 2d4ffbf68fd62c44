//! Recipe parser
//!
//! LL(1) over the default token channel. Parse errors are recoverable at
//! command boundaries: the parser records a diagnostic, resyncs at the next
//! newline at equal-or-lesser indent, and keeps going, so one bad command
//! does not hide the rest of the file's problems.

use crate::syntax::ast::{Command, FlagValue, Recipe, TargetDef};
use crate::syntax::token::{Channel, Token, TokenKind};
use std::fmt;

/// A single parse problem, positioned in the source.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub kind: &'static str,
    pub message: String,
}

/// The aggregated, non-empty set of parse problems for one file.
#[derive(Debug)]
pub struct ParseErrors {
    pub path: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl std::error::Error for ParseErrors {}

impl fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{}:{}:{}: {}: {}",
                self.path, d.line, d.column, d.kind, d.message
            )?;
        }
        Ok(())
    }
}

/// Closed flag sets per opcode. `true` marks a repeatable (list) flag.
/// Opcodes absent from this table are passed through with open flag sets.
fn flag_spec(opcode: &str) -> Option<&'static [(&'static str, bool)]> {
    Some(match opcode {
        "FROM" => &[("platform", false)],
        "FROM DOCKERFILE" => &[
            ("file", false),
            ("target", false),
            ("platform", false),
            ("build-arg", true),
        ],
        "COPY" => &[
            ("dir", false),
            ("from", false),
            ("platform", false),
            ("build-arg", true),
            ("keep-ts", false),
            ("if-exists", false),
        ],
        "RUN" => &[
            ("push", false),
            ("entrypoint", false),
            ("privileged", false),
            ("ssh", false),
            ("no-cache", false),
            ("mount", true),
            ("secret", true),
        ],
        "BUILD" => &[("build-arg", true), ("platform", true), ("push", false)],
        "SAVE ARTIFACT" => &[
            ("keep-ts", false),
            ("keep-own", false),
            ("if-exists", false),
            ("force", false),
            ("push", false),
        ],
        "SAVE IMAGE" => &[("push", false), ("cache-from", true), ("cache-hint", false)],
        "GIT CLONE" => &[("branch", false)],
        "ARG" | "LOCALLY" | "WORKDIR" | "ENTRYPOINT" | "CMD" | "ENV" | "EXPOSE" | "VOLUME"
        | "LABEL" => &[],
        _ => return None,
    })
}

/// Maximum positional arity per opcode; `None` means unbounded.
fn max_positionals(opcode: &str) -> Option<usize> {
    match opcode {
        "FROM" | "FROM DOCKERFILE" | "BUILD" | "WORKDIR" | "ARG" => Some(1),
        "GIT CLONE" | "SAVE ARTIFACT" => Some(2),
        "LOCALLY" => Some(0),
        _ => None,
    }
}

/// Two-word opcodes, resolved by the atom following the head word.
fn sub_opcodes(head: &str) -> &'static [&'static str] {
    match head {
        "FROM" => &["DOCKERFILE"],
        "SAVE" => &["ARTIFACT", "IMAGE"],
        "GIT" => &["CLONE"],
        _ => &[],
    }
}

pub fn parse(tokens: Vec<Token>, path: &str) -> Result<Recipe, ParseErrors> {
    let tokens: Vec<Token> = tokens
        .into_iter()
        .filter(|t| t.channel == Channel::Default)
        .collect();
    let mut parser = Parser {
        tokens,
        pos: 0,
        diagnostics: Vec::new(),
    };
    let recipe = parser.parse_recipe();
    if parser.diagnostics.is_empty() {
        Ok(recipe)
    } else {
        Err(ParseErrors {
            path: path.to_string(),
            diagnostics: parser.diagnostics,
        })
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn bump(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn skip_newlines(&mut self) {
        while self.at(TokenKind::Newline) {
            self.bump();
        }
    }

    fn diag(&mut self, token: &Token, kind: &'static str, message: String) {
        self.diagnostics.push(Diagnostic {
            line: token.line,
            column: token.column,
            kind,
            message,
        });
    }

    /// Skips ahead to the next newline at equal-or-lesser indent and
    /// consumes it, leaving block-structure tokens for the caller.
    fn resync(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                TokenKind::Eof => return,
                TokenKind::Indent => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::Dedent => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.bump();
                }
                TokenKind::Newline => {
                    self.bump();
                    if depth == 0 {
                        return;
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn parse_recipe(&mut self) -> Recipe {
        let mut recipe = Recipe::default();
        loop {
            self.skip_newlines();
            match self.peek().kind {
                TokenKind::Eof => break,
                TokenKind::Atom => {
                    let is_header = self
                        .peek_at(1)
                        .map(|t| t.kind == TokenKind::Atom && t.text == ":")
                        .unwrap_or(false);
                    if is_header {
                        if let Some(target) = self.parse_target() {
                            recipe.targets.push(target);
                        }
                    } else if recipe.targets.is_empty() {
                        match self.parse_command() {
                            Ok(cmd) => recipe.base_block.push(cmd),
                            Err(d) => {
                                self.diagnostics.push(d);
                                self.resync();
                            }
                        }
                    } else {
                        let tok = self.peek().clone();
                        self.diag(
                            &tok,
                            "UnexpectedToken",
                            format!("expected target definition, found {:?}", tok.text),
                        );
                        self.resync();
                    }
                }
                TokenKind::Indent => {
                    let tok = self.peek().clone();
                    self.diag(
                        &tok,
                        "UnexpectedToken",
                        "unexpected indented block at top level".to_string(),
                    );
                    self.skip_block();
                }
                _ => {
                    let tok = self.peek().clone();
                    self.diag(
                        &tok,
                        "UnexpectedToken",
                        format!("expected target definition, found {:?}", tok.kind),
                    );
                    self.bump();
                    self.resync();
                }
            }
        }
        recipe
    }

    /// Consumes a balanced INDENT..DEDENT block, used to step over
    /// misplaced indentation in one piece.
    fn skip_block(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                TokenKind::Eof => return,
                TokenKind::Indent => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::Dedent => {
                    self.bump();
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return;
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn parse_target(&mut self) -> Option<TargetDef> {
        let name_tok = self.bump();
        self.bump(); // the ':' atom
        if !self.at(TokenKind::Newline) {
            let tok = self.peek().clone();
            self.diag(
                &tok,
                "UnexpectedToken",
                format!("expected end of line after target header, found {:?}", tok.text),
            );
            self.resync();
        } else {
            self.bump();
        }
        self.skip_newlines();

        if !self.at(TokenKind::Indent) {
            let tok = self.peek().clone();
            self.diag(
                &tok,
                "UnexpectedToken",
                format!("expected indented block after target {:?}", name_tok.text),
            );
            return None;
        }
        self.bump(); // INDENT

        let mut commands = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek().kind {
                TokenKind::Dedent => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => break,
                TokenKind::Indent => {
                    let tok = self.peek().clone();
                    self.diag(
                        &tok,
                        "UnexpectedToken",
                        "unexpected indent inside target body".to_string(),
                    );
                    self.skip_block();
                }
                _ => match self.parse_command() {
                    Ok(cmd) => commands.push(cmd),
                    Err(d) => {
                        self.diagnostics.push(d);
                        self.resync();
                    }
                },
            }
        }

        Some(TargetDef {
            name: name_tok.text,
            commands,
            line: name_tok.line,
            column: name_tok.column,
        })
    }

    fn parse_command(&mut self) -> Result<Command, Diagnostic> {
        let opcode_tok = self.bump();
        if opcode_tok.kind != TokenKind::Atom {
            return Err(Diagnostic {
                line: opcode_tok.line,
                column: opcode_tok.column,
                kind: "UnexpectedToken",
                message: format!("expected command, found {:?}", opcode_tok.kind),
            });
        }
        let mut opcode = opcode_tok.text.clone();

        // Two-word opcodes resolve against the atom right after the head.
        if self.at(TokenKind::Atom) && sub_opcodes(&opcode).contains(&self.peek().text.as_str()) {
            let sub = self.bump();
            opcode = format!("{} {}", opcode, sub.text);
        }

        let spec = flag_spec(&opcode);
        let arity = max_positionals(&opcode);
        let mut cmd = Command {
            opcode: opcode.clone(),
            flags: Vec::new(),
            args: Vec::new(),
            heredoc: None,
            line: opcode_tok.line,
            column: opcode_tok.column,
        };

        loop {
            match self.peek().kind {
                TokenKind::Newline => {
                    self.bump();
                    break;
                }
                TokenKind::Eof | TokenKind::Dedent => break,
                TokenKind::HeredocBody => {
                    let body = self.bump();
                    cmd.heredoc = Some(body.text);
                }
                TokenKind::Atom => {
                    let tok = self.bump();
                    let text = tok.text;
                    let is_flag =
                        text.starts_with("--") && text.len() > 2 && cmd.args.is_empty();
                    if is_flag {
                        self.parse_flag(&mut cmd, spec, &text, tok.line, tok.column)?;
                    } else {
                        if let Some(max) = arity {
                            if cmd.args.len() >= max {
                                return Err(Diagnostic {
                                    line: tok.line,
                                    column: tok.column,
                                    kind: "DuplicatePositional",
                                    message: format!(
                                        "{} takes at most {} argument{}, found extra {:?}",
                                        opcode,
                                        max,
                                        if max == 1 { "" } else { "s" },
                                        text
                                    ),
                                });
                            }
                        }
                        cmd.args.push(unquote(&text));
                    }
                }
                other => {
                    let tok = self.bump();
                    return Err(Diagnostic {
                        line: tok.line,
                        column: tok.column,
                        kind: "UnexpectedToken",
                        message: format!("unexpected {:?} in command", other),
                    });
                }
            }
        }
        Ok(cmd)
    }

    fn parse_flag(
        &mut self,
        cmd: &mut Command,
        spec: Option<&'static [(&'static str, bool)]>,
        text: &str,
        line: usize,
        column: usize,
    ) -> Result<(), Diagnostic> {
        // Header-mode atoms arrive whole; command-mode atoms split at '='.
        let (name, mut value) = match text[2..].split_once('=') {
            Some((n, v)) => (n.to_string(), Some(v.to_string())),
            None => (text[2..].to_string(), None),
        };
        if value.is_none() && self.at(TokenKind::Atom) && self.peek().text == "=" {
            self.bump();
            if !self.at(TokenKind::Atom) {
                let tok = self.peek().clone();
                return Err(Diagnostic {
                    line: tok.line,
                    column: tok.column,
                    kind: "UnexpectedToken",
                    message: format!("expected value after --{}=", name),
                });
            }
            value = Some(unquote(&self.bump().text));
        }

        let repeatable = match spec {
            Some(spec) => match spec.iter().find(|(n, _)| *n == name) {
                Some((_, repeatable)) => *repeatable,
                None => {
                    return Err(Diagnostic {
                        line,
                        column,
                        kind: "UnknownFlag",
                        message: format!("unknown flag --{} for {}", name, cmd.opcode),
                    })
                }
            },
            None => false,
        };

        let incoming = match value {
            Some(v) => FlagValue::Str(v),
            None => FlagValue::Bool(true),
        };
        if repeatable {
            let new_value = match incoming {
                FlagValue::Str(s) => s,
                _ => String::new(),
            };
            if let Some((_, existing)) = cmd.flags.iter_mut().find(|(n, _)| *n == name) {
                match existing {
                    FlagValue::List(values) => values.push(new_value),
                    FlagValue::Str(first) => {
                        *existing = FlagValue::List(vec![first.clone(), new_value]);
                    }
                    FlagValue::Bool(_) => *existing = FlagValue::List(vec![new_value]),
                }
            } else {
                cmd.flags.push((name, FlagValue::Str(new_value)));
            }
        } else {
            cmd.flags.push((name, incoming));
        }
        Ok(())
    }
}

/// Strips and unescapes a quoted atom; bare atoms pass through.
fn unquote(text: &str) -> String {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        let inner = &text[1..text.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        out
    } else if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        text[1..text.len() - 1].to_string()
    } else {
        text.to_string()
    }
}
