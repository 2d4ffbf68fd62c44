//! Indentation-sensitive lexer for Kilnfile recipes
//!
//! The lexer is mode-driven. At the top level (header mode) atoms are coarse:
//! one atom per whitespace-separated word, with a trailing `:` split off so
//! target headers tokenize as `name`, `:`. Inside a target body (command
//! mode) atoms are finer: `--flag` atoms stop at `=`, `=` is its own atom,
//! and quoted strings are single atoms. Entering a body pushes command mode;
//! a dedent back to the top level pops it.
//!
//! Indent-level transitions at the start of content-bearing lines are turned
//! into synthetic INDENT/DEDENT tokens through a token queue, with multiple
//! DEDENTs emitted when more than one level closes at once. Whitespace and
//! comments are kept on a separate channel so the stream reproduces the
//! source.

use crate::syntax::token::{Token, TokenKind};
use thiserror::Error;

const TAB_WIDTH: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LexError {
    #[error("{line}:{column}: LexError: mixed tab and space indentation")]
    MixedIndent { line: usize, column: usize },
    #[error("{line}:{column}: LexError: unindent does not match any outer indentation level")]
    InconsistentDedent { line: usize, column: usize },
    #[error("{line}:{column}: LexError: unterminated here-document (missing closing {tag})")]
    UnterminatedHeredoc {
        tag: String,
        line: usize,
        column: usize,
    },
    #[error("{line}:{column}: LexError: unterminated string")]
    UnterminatedString { line: usize, column: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Header,
    Command,
}

pub struct Lexer {
    src: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    out: Vec<Token>,
    indent_stack: Vec<usize>,
    mode_stack: Vec<Mode>,
    at_line_start: bool,
    indent_char: Option<char>,
    pending_heredoc: Option<PendingHeredoc>,
}

struct PendingHeredoc {
    tag: String,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        // CRLF is normalized before lexing.
        let normalized = input.replace("\r\n", "\n");
        Self {
            src: normalized.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            out: Vec::new(),
            indent_stack: vec![0],
            mode_stack: vec![Mode::Header],
            at_line_start: true,
            indent_char: None,
            pending_heredoc: None,
        }
    }

    /// Runs the lexer to completion, producing the full token stream ending
    /// in EOF. Any lex error is fatal for the file.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        while self.pos < self.src.len() {
            if self.at_line_start {
                self.lex_line_start()?;
                continue;
            }
            match self.cur() {
                '\n' => self.lex_newline()?,
                ' ' | '\t' => self.lex_ws(),
                '#' if self.at_word_boundary() => self.lex_comment(),
                '"' | '\'' => self.lex_quoted()?,
                '\\' if self.peek(1) == Some('\n') => {
                    self.absorb_continuation();
                }
                _ => self.lex_atom()?,
            }
        }

        if let Some(h) = self.pending_heredoc.take() {
            return Err(LexError::UnterminatedHeredoc {
                tag: h.tag,
                line: h.line,
                column: h.column,
            });
        }

        // A final line without a trailing newline still terminates its
        // command.
        let needs_nl = self
            .out
            .iter()
            .rev()
            .find(|t| t.kind != TokenKind::Ws)
            .map(|t| t.kind != TokenKind::Newline)
            .unwrap_or(false);
        if needs_nl {
            self.emit(TokenKind::Newline, "\n");
        }

        while *self.indent_stack.last().unwrap_or(&0) > 0 {
            self.indent_stack.pop();
            self.emit(TokenKind::Dedent, "");
        }
        self.mode_stack.truncate(1);
        self.emit(TokenKind::Eof, "");
        Ok(self.out)
    }

    fn cur(&self) -> char {
        self.src[self.pos]
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.src.get(self.pos + ahead).copied()
    }

    fn advance(&mut self) {
        if self.cur() == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
    }

    fn emit(&mut self, kind: TokenKind, text: impl Into<String>) {
        let (line, col) = (self.line, self.col);
        self.emit_at(kind, text, line, col);
    }

    fn emit_at(&mut self, kind: TokenKind, text: impl Into<String>, line: usize, column: usize) {
        self.out.push(Token::new(kind, text, line, column));
    }

    fn mode(&self) -> Mode {
        *self.mode_stack.last().unwrap_or(&Mode::Header)
    }

    fn at_word_boundary(&self) -> bool {
        match self.out.last() {
            None => true,
            Some(t) => !matches!(t.kind, TokenKind::Atom | TokenKind::HeredocBody),
        }
    }

    /// Measures leading whitespace, emits it on the whitespace channel, and
    /// synthesizes INDENT/DEDENT tokens when the line carries content.
    fn lex_line_start(&mut self) -> Result<(), LexError> {
        let (start_line, start_col) = (self.line, self.col);
        let mut ws = String::new();
        let mut width = 0usize;
        let mut saw_space = false;
        let mut saw_tab = false;
        while self.pos < self.src.len() {
            match self.cur() {
                ' ' => {
                    saw_space = true;
                    width += 1;
                }
                '\t' => {
                    saw_tab = true;
                    width = (width / TAB_WIDTH + 1) * TAB_WIDTH;
                }
                _ => break,
            }
            ws.push(self.cur());
            self.advance();
        }
        if saw_space && saw_tab {
            return Err(LexError::MixedIndent {
                line: start_line,
                column: start_col,
            });
        }
        if !ws.is_empty() {
            self.emit_at(TokenKind::Ws, ws.clone(), start_line, start_col);
        }

        self.at_line_start = false;

        // Blank and comment-only lines carry no content and leave the
        // indent level untouched.
        if self.pos >= self.src.len() || self.cur() == '\n' || self.cur() == '#' {
            return Ok(());
        }

        let line_char = if saw_tab { Some('\t') } else if saw_space { Some(' ') } else { None };
        if let (Some(expected), Some(seen)) = (self.indent_char, line_char) {
            if expected != seen {
                return Err(LexError::MixedIndent {
                    line: start_line,
                    column: start_col,
                });
            }
        }

        let current = *self.indent_stack.last().unwrap();
        if width > current {
            self.indent_stack.push(width);
            self.emit_at(TokenKind::Indent, "", start_line, start_col);
            if self.mode() == Mode::Header {
                self.mode_stack.push(Mode::Command);
            }
            if self.indent_char.is_none() {
                self.indent_char = line_char;
            }
        } else if width < current {
            while *self.indent_stack.last().unwrap() > width {
                self.indent_stack.pop();
                self.emit_at(TokenKind::Dedent, "", start_line, start_col);
            }
            if *self.indent_stack.last().unwrap() != width {
                return Err(LexError::InconsistentDedent {
                    line: start_line,
                    column: start_col,
                });
            }
            if *self.indent_stack.last().unwrap() == 0 {
                self.mode_stack.truncate(1);
                self.indent_char = None;
            }
        }
        Ok(())
    }

    fn lex_ws(&mut self) {
        let (line, col) = (self.line, self.col);
        let mut ws = String::new();
        while self.pos < self.src.len() && matches!(self.cur(), ' ' | '\t') {
            ws.push(self.cur());
            self.advance();
        }
        self.emit_at(TokenKind::Ws, ws, line, col);
    }

    fn lex_comment(&mut self) {
        let (line, col) = (self.line, self.col);
        let mut text = String::new();
        while self.pos < self.src.len() && self.cur() != '\n' {
            text.push(self.cur());
            self.advance();
        }
        self.emit_at(TokenKind::Ws, text, line, col);
    }

    fn lex_newline(&mut self) -> Result<(), LexError> {
        if self.pending_heredoc.is_some() {
            return self.capture_heredoc();
        }
        self.emit(TokenKind::Newline, "\n");
        self.advance();
        self.at_line_start = true;
        Ok(())
    }

    /// Consumes raw input up to a line consisting solely of the pending tag.
    /// The body is emitted verbatim as one token, followed by the command's
    /// NL. The closing tag line itself is skipped.
    fn capture_heredoc(&mut self) -> Result<(), LexError> {
        let pending = self.pending_heredoc.take().unwrap();
        self.advance(); // consume the newline opening the body
        let (body_line, body_col) = (self.line, self.col);
        let mut body = String::new();
        loop {
            if self.pos >= self.src.len() {
                return Err(LexError::UnterminatedHeredoc {
                    tag: pending.tag,
                    line: pending.line,
                    column: pending.column,
                });
            }
            let mut line_text = String::new();
            while self.pos < self.src.len() && self.cur() != '\n' {
                line_text.push(self.cur());
                self.advance();
            }
            let at_eof = self.pos >= self.src.len();
            if !at_eof {
                self.advance(); // consume the line's newline
            }
            if line_text == pending.tag {
                self.emit_at(TokenKind::HeredocBody, body, body_line, body_col);
                self.emit(TokenKind::Newline, "\n");
                self.at_line_start = true;
                return Ok(());
            }
            if at_eof {
                return Err(LexError::UnterminatedHeredoc {
                    tag: pending.tag,
                    line: pending.line,
                    column: pending.column,
                });
            }
            body.push_str(&line_text);
            body.push('\n');
        }
    }

    fn lex_quoted(&mut self) -> Result<(), LexError> {
        let (line, col) = (self.line, self.col);
        let quote = self.cur();
        let mut text = String::new();
        text.push(quote);
        self.advance();
        loop {
            if self.pos >= self.src.len() || self.cur() == '\n' {
                return Err(LexError::UnterminatedString { line, column: col });
            }
            let c = self.cur();
            text.push(c);
            self.advance();
            if c == '\\' && quote == '"' {
                if self.pos >= self.src.len() || self.cur() == '\n' {
                    return Err(LexError::UnterminatedString { line, column: col });
                }
                text.push(self.cur());
                self.advance();
                continue;
            }
            if c == quote {
                break;
            }
        }
        self.emit_at(TokenKind::Atom, text, line, col);
        Ok(())
    }

    /// Absorbs a backslash-newline continuation together with the leading
    /// whitespace of the continuation line. Returns true when the absorbed
    /// pattern included a blank line, which re-introduces a separator
    /// between the surrounding atoms.
    fn absorb_continuation(&mut self) -> bool {
        self.advance(); // backslash
        self.advance(); // newline
        let mut separator = false;
        loop {
            while self.pos < self.src.len() && matches!(self.cur(), ' ' | '\t') {
                self.advance();
            }
            if self.pos < self.src.len() && self.cur() == '\n' {
                // A blank line inside the continuation.
                self.advance();
                separator = true;
                continue;
            }
            if self.pos + 1 < self.src.len()
                && self.cur() == '\\'
                && self.peek(1) == Some('\n')
            {
                // A line holding only another continuation backslash.
                self.advance();
                self.advance();
                separator = true;
                continue;
            }
            break;
        }
        separator
    }

    fn lex_atom(&mut self) -> Result<(), LexError> {
        let (line, col) = (self.line, self.col);
        let mut text = String::new();

        if self.mode() == Mode::Command && self.cur() == '=' {
            self.advance();
            self.emit_at(TokenKind::Atom, "=", line, col);
            return Ok(());
        }

        while self.pos < self.src.len() {
            let c = self.cur();
            if matches!(c, '\n' | ' ' | '\t') {
                break;
            }
            if c == '\\' && self.peek(1) == Some('\n') {
                if self.absorb_continuation() {
                    break;
                }
                continue;
            }
            if self.mode() == Mode::Command && c == '=' && text.starts_with("--") {
                break;
            }
            text.push(c);
            self.advance();
        }

        if self.mode() == Mode::Header && text.len() > 1 && text.ends_with(':') {
            let head = &text[..text.len() - 1];
            self.emit_at(TokenKind::Atom, head.to_string(), line, col);
            self.emit_at(TokenKind::Atom, ":", line, col + head.chars().count());
            return Ok(());
        }

        if let Some(tag) = heredoc_tag(&text) {
            self.pending_heredoc = Some(PendingHeredoc {
                tag,
                line,
                column: col,
            });
        }
        self.emit_at(TokenKind::Atom, text, line, col);
        Ok(())
    }
}

/// Recognizes a here-doc opener `<<TAG` where TAG is a non-empty
/// identifier. Anything else is an ordinary atom.
fn heredoc_tag(atom: &str) -> Option<String> {
    let tag = atom.strip_prefix("<<")?;
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::token::{Channel, TokenKind};

    fn atoms(input: &str) -> Vec<String> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .filter(|t| matches!(t.kind, TokenKind::Atom | TokenKind::HeredocBody))
            .map(|t| t.text)
            .collect()
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .filter(|t| t.channel == Channel::Default)
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn header_splits_trailing_colon() {
        let toks = atoms("build:\n");
        assert_eq!(toks, vec!["build", ":"]);
    }

    #[test]
    fn target_body_emits_indent_dedent() {
        use TokenKind::*;
        let input = "build:\n    RUN make\n    RUN make test\n";
        assert_eq!(
            kinds(input),
            vec![
                Atom, Atom, Newline, Indent, Atom, Atom, Newline, Atom, Atom, Atom, Newline,
                Dedent, Eof
            ]
        );
    }

    #[test]
    fn multiple_dedents_close_nested_levels() {
        use TokenKind::*;
        let input = "a:\n  X\n    Y\nb:\n";
        assert_eq!(
            kinds(input),
            vec![
                Atom, Atom, Newline, Indent, Atom, Newline, Indent, Atom, Newline, Dedent,
                Dedent, Atom, Atom, Newline, Eof
            ]
        );
    }

    #[test]
    fn continuation_glues_atoms_together() {
        let toks = atoms("build:\n    RUN echo a\\\n    b > out.txt\n");
        assert_eq!(toks, vec!["build", ":", "RUN", "echo", "ab", ">", "out.txt"]);
    }

    #[test]
    fn continuation_with_blank_line_keeps_atoms_apart() {
        let toks = atoms("build:\n    RUN echo a\\\n\\\n    b\n");
        assert_eq!(toks, vec!["build", ":", "RUN", "echo", "a", "b"]);
    }

    #[test]
    fn continuation_with_empty_line_keeps_atoms_apart() {
        let toks = atoms("build:\n    RUN echo a\\\n\n    b\n");
        assert_eq!(toks, vec!["build", ":", "RUN", "echo", "a", "b"]);
    }

    #[test]
    fn continuation_between_atoms_is_absorbed() {
        let toks = atoms("build:\n    RUN echo a \\\n    b\n");
        assert_eq!(toks, vec!["build", ":", "RUN", "echo", "a", "b"]);
    }

    #[test]
    fn flag_equals_value_splits_in_command_mode() {
        let toks = atoms("build:\n    COPY --from=base /src /dst\n");
        assert_eq!(
            toks,
            vec!["build", ":", "COPY", "--from", "=", "base", "/src", "/dst"]
        );
    }

    #[test]
    fn plain_equals_stays_inside_words() {
        let toks = atoms("build:\n    ENV FOO=bar\n");
        assert_eq!(toks, vec!["build", ":", "ENV", "FOO=bar"]);
    }

    #[test]
    fn quoted_strings_are_single_atoms() {
        let toks = atoms("build:\n    RUN echo \"hello world\" 'a b'\n");
        assert_eq!(
            toks,
            vec!["build", ":", "RUN", "echo", "\"hello world\"", "'a b'"]
        );
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let err = Lexer::new("build:\n    RUN echo \"oops\n").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { line: 2, .. }));
    }

    #[test]
    fn heredoc_captures_verbatim_body() {
        let input = "build:\n    RUN <<SCRIPT\nset -e\nmake all\nSCRIPT\n    RUN ls\n";
        let toks = Lexer::new(input).tokenize().unwrap();
        let body = toks
            .iter()
            .find(|t| t.kind == TokenKind::HeredocBody)
            .unwrap();
        assert_eq!(body.text, "set -e\nmake all\n");
        // Lexing resumes after the closing tag line.
        let after: Vec<_> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::Atom)
            .map(|t| t.text.as_str())
            .collect();
        assert!(after.contains(&"ls"));
    }

    #[test]
    fn heredoc_any_identifier_tag() {
        let input = "build:\n    RUN <<END_OF_SCRIPT\nEOF\nEND_OF_SCRIPT\n";
        let toks = Lexer::new(input).tokenize().unwrap();
        let body = toks
            .iter()
            .find(|t| t.kind == TokenKind::HeredocBody)
            .unwrap();
        assert_eq!(body.text, "EOF\n");
    }

    #[test]
    fn heredoc_missing_tag_is_fatal() {
        let err = Lexer::new("build:\n    RUN <<EOT\nnever closed\n")
            .tokenize()
            .unwrap_err();
        assert!(matches!(err, LexError::UnterminatedHeredoc { .. }));
    }

    #[test]
    fn mixed_indent_within_run_is_fatal() {
        let err = Lexer::new("build:\n \tRUN x\n").tokenize().unwrap_err();
        assert!(matches!(err, LexError::MixedIndent { line: 2, .. }));
    }

    #[test]
    fn mixed_indent_across_lines_is_fatal() {
        let err = Lexer::new("build:\n    RUN x\n\tRUN y\n").tokenize().unwrap_err();
        assert!(matches!(err, LexError::MixedIndent { line: 3, .. }));
    }

    #[test]
    fn tabs_expand_to_multiple_of_eight() {
        use TokenKind::*;
        let input = "a:\n\tX\n\tY\n";
        assert_eq!(
            kinds(input),
            vec![Atom, Atom, Newline, Indent, Atom, Newline, Atom, Newline, Dedent, Eof]
        );
    }

    #[test]
    fn crlf_is_normalized() {
        let toks = atoms("build:\r\n    RUN make\r\n");
        assert_eq!(toks, vec!["build", ":", "RUN", "make"]);
    }

    #[test]
    fn comments_stay_on_whitespace_channel() {
        let toks = Lexer::new("# header\nbuild:\n    RUN make # trailing\n")
            .tokenize()
            .unwrap();
        let comments: Vec<_> = toks
            .iter()
            .filter(|t| t.text.starts_with('#'))
            .collect();
        assert_eq!(comments.len(), 2);
        assert!(comments.iter().all(|t| t.channel == Channel::Whitespace));
    }

    #[test]
    fn missing_final_newline_still_terminates() {
        use TokenKind::*;
        assert_eq!(
            kinds("build:\n    RUN make"),
            vec![Atom, Atom, Newline, Indent, Atom, Atom, Newline, Dedent, Eof]
        );
    }

    #[test]
    fn tokens_reproduce_source() {
        let input = "# top\nARG version=1\n\nbuild:\n    RUN make all # build\n    SAVE ARTIFACT out\n";
        let toks = Lexer::new(input).tokenize().unwrap();
        let rebuilt: String = toks
            .iter()
            .filter(|t| !t.is_synthetic())
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(rebuilt, input);
    }

    #[test]
    fn empty_input_is_just_eof() {
        let toks = Lexer::new("").tokenize().unwrap();
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenKind::Eof);
    }
}
