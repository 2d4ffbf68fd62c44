//! Lexer integration tests over realistic recipe files

use kiln::syntax::{Channel, Lexer, TokenKind};

const RECIPE: &str = "\
# build recipe
ARG version=1.0

build:
    FROM alpine:3.20
    WORKDIR /src
    RUN echo compiling \\
release \\
mode
    SAVE ARTIFACT out

test:
    FROM +build
    RUN <<SCRIPT
set -e
make check
SCRIPT
";

fn tokenize(input: &str) -> Vec<kiln::syntax::Token> {
    Lexer::new(input).tokenize().unwrap()
}

#[test]
fn default_channel_structure_is_balanced() {
    let tokens = tokenize(RECIPE);
    let indents = tokens.iter().filter(|t| t.kind == TokenKind::Indent).count();
    let dedents = tokens.iter().filter(|t| t.kind == TokenKind::Dedent).count();
    assert_eq!(indents, 2);
    assert_eq!(indents, dedents);
    assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
}

#[test]
fn continuation_joins_into_one_logical_line() {
    let tokens = tokenize(RECIPE);
    let default: Vec<_> = tokens
        .iter()
        .filter(|t| t.channel == Channel::Default)
        .collect();
    // The continuation absorbs both backslash-newlines, so RUN through
    // `mode` is one logical line: no NL token between those atoms.
    let run_idx = default
        .iter()
        .position(|t| t.kind == TokenKind::Atom && t.text == "echo")
        .unwrap();
    let mode_idx = default
        .iter()
        .position(|t| t.kind == TokenKind::Atom && t.text == "mode")
        .unwrap();
    assert!(default[run_idx..mode_idx]
        .iter()
        .all(|t| t.kind != TokenKind::Newline));
}

#[test]
fn adjacent_continuation_fuses_fragments() {
    let tokens = tokenize("build:\n    RUN echo compiling\\\n    now\n");
    let atoms: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Atom)
        .map(|t| t.text.as_str())
        .collect();
    // Backslash-newline-indent yields zero separators, so the fragments
    // around it become one atom.
    assert!(atoms.contains(&"compilingnow"));
}

#[test]
fn heredoc_body_is_one_verbatim_token() {
    let tokens = tokenize(RECIPE);
    let body: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::HeredocBody)
        .map(|t| t.text.as_str())
        .collect();
    assert_eq!(body, vec!["set -e\nmake check\n"]);
}

#[test]
fn positions_point_into_the_source() {
    let tokens = tokenize("build:\n    RUN make\n");
    let run = tokens
        .iter()
        .find(|t| t.kind == TokenKind::Atom && t.text == "RUN")
        .unwrap();
    assert_eq!((run.line, run.column), (2, 5));
    let make = tokens
        .iter()
        .find(|t| t.kind == TokenKind::Atom && t.text == "make")
        .unwrap();
    assert_eq!((make.line, make.column), (2, 9));
}

#[test]
fn stream_without_continuations_reproduces_source() {
    let input = "# top\nARG a=1\n\nbuild:\n    RUN make # note\n    EXPOSE 8080\n";
    let tokens = tokenize(input);
    let rebuilt: String = tokens
        .iter()
        .filter(|t| !t.is_synthetic())
        .map(|t| t.text.as_str())
        .collect();
    assert_eq!(rebuilt, input);
}

#[test]
fn parser_channel_excludes_whitespace() {
    let tokens = tokenize(RECIPE);
    assert!(tokens
        .iter()
        .filter(|t| t.channel == Channel::Default)
        .all(|t| t.kind != TokenKind::Ws));
    // Comments ride the whitespace channel.
    assert!(tokens
        .iter()
        .any(|t| t.channel == Channel::Whitespace && t.text.starts_with('#')));
}
