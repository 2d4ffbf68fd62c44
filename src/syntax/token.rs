//! Lexical tokens for Kilnfile recipes

/// Token kinds produced by the lexer. `Indent` and `Dedent` are synthetic:
/// they mark indent-level transitions and carry no source text of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A non-whitespace lexeme in the current mode.
    Atom,
    /// A run of spaces or tabs, or a comment. Whitespace channel only.
    Ws,
    /// A physical newline.
    Newline,
    Indent,
    Dedent,
    /// The verbatim body of a here-document.
    HeredocBody,
    Eof,
}

/// Token channel. The parser consumes only the default channel; whitespace
/// and comments are retained on their own channel so the token stream can
/// reproduce the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Default,
    Whitespace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based source line.
    pub line: usize,
    /// 1-based source column.
    pub column: usize,
    pub channel: Channel,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        let channel = match kind {
            TokenKind::Ws => Channel::Whitespace,
            _ => Channel::Default,
        };
        Self {
            kind,
            text: text.into(),
            line,
            column,
            channel,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof
        )
    }
}
