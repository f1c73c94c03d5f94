//! Configuration scanner: a token stream over a stack of included
//! files.
//!
//! Tokens are identifiers, decimal numbers, double-quoted strings,
//! bare literals, and significant newlines. `#` starts a comment that
//! runs to end of line; the terminating newline is still delivered.
//! `Include` pushes a new file onto the stack and scanning resumes in
//! the parent when it runs out. Re-inclusion of a file that is still
//! open anywhere on the stack is detected by its (device, inode)
//! pair, not by path.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;

use crate::diag::{self, Point, Range};
use crate::error::Result;

const TAB_WIDTH: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    String,
    Literal,
    Newline,
    Eof,
}

impl TokenKind {
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Ident => "identifier",
            TokenKind::Number => "number",
            TokenKind::String => "quoted string",
            TokenKind::Literal => "literal",
            TokenKind::Newline => "end of line",
            TokenKind::Eof => "end of file",
        }
    }
}

/// A set of token kinds, used to compose "expected X or Y" messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMask(u8);

impl TokenMask {
    pub const IDENT: TokenMask = TokenMask(1);
    pub const NUMBER: TokenMask = TokenMask(2);
    pub const STRING: TokenMask = TokenMask(4);
    pub const LITERAL: TokenMask = TokenMask(8);
    /// Any unquoted character sequence.
    pub const UNQUOTED: TokenMask = TokenMask(1 | 2 | 8);

    pub const fn or(self, other: TokenMask) -> TokenMask {
        TokenMask(self.0 | other.0)
    }

    pub fn contains(self, kind: TokenKind) -> bool {
        let bit = match kind {
            TokenKind::Ident => 1,
            TokenKind::Number => 2,
            TokenKind::String => 4,
            TokenKind::Literal => 8,
            _ => return false,
        };
        self.0 & bit != 0
    }

    fn names(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.0 & 1 != 0 {
            out.push(TokenKind::Ident.name());
        }
        if self.0 & 2 != 0 {
            out.push(TokenKind::Number.name());
        }
        if self.0 & 4 != 0 {
            out.push(TokenKind::String.name());
        }
        if self.0 & 8 != 0 {
            out.push(TokenKind::Literal.name());
        }
        out
    }
}

impl std::fmt::Display for TokenMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.names();
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                if i + 1 == names.len() {
                    f.write_str(" or ")?;
                } else {
                    f.write_str(", ")?;
                }
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub range: Range,
}

fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_cont(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

/// One open input file. The whole file is held in memory; the handle
/// is closed as soon as it has been read, but the (device, inode)
/// identity is kept for the include-cycle check.
struct Input {
    data: Vec<u8>,
    pos: usize,
    dev: u64,
    ino: u64,
    locus: Point,
    /// Column at the end of the previous line, so that a single
    /// put-back across a newline restores it.
    prev_col: u32,
}

enum Scanned {
    Tok(Token),
    FileEof,
}

impl Input {
    fn getc(&mut self) -> Option<u8> {
        let c = *self.data.get(self.pos)?;
        self.pos += 1;
        if c == b'\n' {
            self.locus.line += 1;
            self.prev_col = self.locus.col;
            self.locus.col = 0;
        } else if c == b'\t' {
            self.locus.col += TAB_WIDTH;
        } else {
            self.locus.col += 1;
        }
        Some(c)
    }

    fn ungetc(&mut self, c: Option<u8>) {
        if let Some(c) = c {
            self.pos -= 1;
            if c == b'\n' {
                self.locus.line -= 1;
                self.locus.col = self.prev_col;
            } else {
                self.locus.col -= 1;
            }
        }
    }

    fn token(&self, kind: TokenKind, text: Vec<u8>, beg: Point) -> Token {
        Token {
            kind,
            text: String::from_utf8_lossy(&text).into_owned(),
            range: Range { beg, end: self.locus.clone() },
        }
    }

    fn next_token(&mut self) -> Result<Scanned> {
        loop {
            let c = match self.getc() {
                None => return Ok(Scanned::FileEof),
                Some(c) => c,
            };

            if c == b'#' {
                loop {
                    match self.getc() {
                        None => return Ok(Scanned::FileEof),
                        Some(b'\n') => break,
                        Some(_) => {}
                    }
                }
                // fall through: deliver the comment's newline
                return Ok(Scanned::Tok(self.newline_token()));
            }

            if c == b'\n' {
                return Ok(Scanned::Tok(self.newline_token()));
            }

            if is_space(c) {
                continue;
            }

            let beg = self.locus.clone();

            if c == b'"' {
                return self.string_token(beg).map(Scanned::Tok);
            }

            let mut buf = Vec::new();
            let mut c = c;

            if is_ident_start(c) {
                loop {
                    buf.push(c);
                    match self.getc() {
                        None => {
                            self.ungetc(None);
                            return Ok(Scanned::Tok(self.token(TokenKind::Ident, buf, beg)));
                        }
                        Some(n) if is_ident_cont(n) => c = n,
                        Some(n) if is_space(n) => {
                            self.ungetc(Some(n));
                            return Ok(Scanned::Tok(self.token(TokenKind::Ident, buf, beg)));
                        }
                        // followed by a non-whitespace character:
                        // the run continues as a literal
                        Some(n) => {
                            c = n;
                            break;
                        }
                    }
                }
            }

            let mut kind = if c.is_ascii_digit() { TokenKind::Number } else { TokenKind::Literal };
            loop {
                buf.push(c);
                if !c.is_ascii_digit() {
                    kind = TokenKind::Literal;
                }
                match self.getc() {
                    None => break,
                    Some(n) if is_space(n) => {
                        self.ungetc(Some(n));
                        break;
                    }
                    Some(n) => c = n,
                }
            }
            return Ok(Scanned::Tok(self.token(kind, buf, beg)));
        }
    }

    fn newline_token(&self) -> Token {
        let beg = Point {
            file: self.locus.file.clone(),
            line: self.locus.line - 1,
            col: self.prev_col,
        };
        Token {
            kind: TokenKind::Newline,
            text: String::new(),
            range: Range { beg, end: self.locus.clone() },
        }
    }

    fn string_token(&mut self, beg: Point) -> Result<Token> {
        let mut buf = Vec::new();
        loop {
            let mut c = self.getc();
            if c == Some(b'"') {
                break;
            }
            if c == Some(b'\\') {
                c = self.getc();
                if !matches!(c, None | Some(b'"') | Some(b'\\')) {
                    diag::report_at_point(&self.locus, "unrecognized escape character");
                }
            }
            match c {
                None => {
                    return Err(diag::error_at_point(&self.locus, "end of file in quoted string".into()));
                }
                Some(b'\n') => {
                    return Err(diag::error_at_point(&self.locus, "end of line in quoted string".into()));
                }
                Some(ch) => buf.push(ch),
            }
        }
        Ok(self.token(TokenKind::String, buf, beg))
    }
}

/// The scanner proper: a stack of open inputs plus a one-token
/// put-back slot.
pub struct Scanner {
    stack: Vec<Input>,
    pushed: Option<Token>,
    last_range: Range,
    last_point: Point,
}

impl Scanner {
    /// Open the root configuration file.
    pub fn open(path: &str) -> Result<Scanner> {
        let input = open_input(path, None)?;
        let point = input.locus.clone();
        Ok(Scanner {
            stack: vec![input],
            pushed: None,
            last_range: Range::at(point.clone()),
            last_point: point,
        })
    }

    /// Push an included file, refusing re-entry of any file that is
    /// still open on the stack.
    pub fn include(&mut self, path: &str) -> Result<()> {
        let meta = fs::metadata(path)
            .map_err(|e| diag::error_at(&self.last_range, format!("can't stat {path}: {e}")))?;
        let (dev, ino) = (meta.dev(), meta.ino());

        for (i, input) in self.stack.iter().enumerate().rev() {
            if input.dev == dev && input.ino == ino {
                return Err(if i > 0 {
                    let err =
                        diag::error_at(&self.last_range, format!("{path} already included"));
                    diag::report_at_point(
                        &self.stack[i - 1].locus,
                        "here is the place of original inclusion",
                    );
                    err
                } else {
                    diag::error_at(
                        &self.last_range,
                        format!("{path} already included (at top level)"),
                    )
                });
            }
        }

        let input = open_input(path, Some(&self.last_range))?;
        self.stack.push(input);
        Ok(())
    }

    /// Read the next token, transparently resuming the parent input
    /// when an included file runs out. [`TokenKind::Eof`] is returned
    /// only once the whole stack is exhausted.
    pub fn next_token(&mut self) -> Result<Token> {
        if let Some(tok) = self.pushed.take() {
            self.last_range = tok.range.clone();
            return Ok(tok);
        }
        loop {
            let top = match self.stack.last_mut() {
                Some(top) => top,
                None => {
                    let tok = Token {
                        kind: TokenKind::Eof,
                        text: String::new(),
                        range: Range::at(self.last_point.clone()),
                    };
                    self.last_range = tok.range.clone();
                    return Ok(tok);
                }
            };
            match top.next_token()? {
                Scanned::Tok(tok) => {
                    self.last_range = tok.range.clone();
                    return Ok(tok);
                }
                Scanned::FileEof => {
                    let input = self.stack.pop().expect("non-empty stack");
                    self.last_point = input.locus;
                }
            }
        }
    }

    /// Put one token back for a single re-read. The original range is
    /// preserved.
    pub fn pushback(&mut self, tok: Token) {
        debug_assert!(self.pushed.is_none());
        self.pushed = Some(tok);
    }

    /// Range of the most recently delivered token.
    pub fn last_range(&self) -> &Range {
        &self.last_range
    }

    /// True once every input has been read to the end.
    pub fn is_finished(&self) -> bool {
        self.stack.is_empty() && self.pushed.is_none()
    }

    /// Read any token, treating end of input as an error.
    pub fn any(&mut self) -> Result<Token> {
        let tok = self.next_token()?;
        if tok.kind == TokenKind::Eof {
            return Err(diag::error_at(&tok.range, "unexpected end of file".into()));
        }
        Ok(tok)
    }

    /// Read a token and require it to be in `mask`.
    pub fn expect(&mut self, mask: TokenMask) -> Result<Token> {
        let tok = self.any()?;
        if !mask.contains(tok.kind) {
            return Err(diag::error_at(
                &tok.range,
                format!("expected {}, but found {}", mask, tok.kind.name()),
            ));
        }
        Ok(tok)
    }
}

fn open_input(path: &str, include_site: Option<&Range>) -> Result<Input> {
    let at = |msg: String| match include_site {
        Some(range) => diag::error_at(range, msg),
        None => diag::error_nolocus(msg),
    };
    let meta = fs::metadata(path).map_err(|e| at(format!("can't stat {path}: {e}")))?;
    let data = fs::read(path).map_err(|e| at(format!("can't open {path}: {e}")))?;
    let file: Arc<str> = Arc::from(path);
    Ok(Input {
        data,
        pos: 0,
        dev: meta.dev(),
        ino: meta.ino(),
        locus: Point::new(file),
        prev_col: 0,
    })
}
