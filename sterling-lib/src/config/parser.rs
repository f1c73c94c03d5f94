//! Table-driven section parser.
//!
//! Each configuration section is described by a keyword table: a
//! slice of [`Keyword`] records binding a statement name to its
//! handler. The driver reads one statement per line, dispatches the
//! leading identifier case-insensitively, and tracks the locus range
//! covered by the section so later diagnostics can point at it as a
//! whole.

use crate::config::Defaults;
use crate::diag::{self, Range};
use crate::error::Result;
use crate::features::Features;
use crate::scan::{Scanner, TokenKind};

/// What a statement handler did with the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Statement complete; the driver consumes the terminating
    /// newline.
    Ok,
    /// Statement already consumed its terminator (`Include` swaps the
    /// input mid-stream).
    OkNoNewline,
    /// The section is finished.
    End,
}

/// Shared parser state threaded through every handler.
pub struct Ctx<'a> {
    pub scan: &'a mut Scanner,
    pub dfl: &'a mut Defaults,
    pub features: &'a Features,
}

pub type Handler<T> = fn(&mut T, &mut Ctx) -> Result<Action>;

pub struct Keyword<T> {
    pub name: &'static str,
    pub handler: Handler<T>,
}

/// Universal `End` handler.
pub fn parse_end<T>(_target: &mut T, _ctx: &mut Ctx) -> Result<Action> {
    Ok(Action::End)
}

fn find<'t, T>(table: &'t [Keyword<T>], name: &str) -> Option<&'t Keyword<T>> {
    table.iter().find(|kw| kw.name.eq_ignore_ascii_case(name))
}

/// Drive one section (or, with `section == false`, the whole file).
///
/// Returns the locus range spanning the section, from the token that
/// introduced it through its `End` line.
pub fn parser_loop<T>(
    table: &[Keyword<T>],
    target: &mut T,
    ctx: &mut Ctx,
    section: bool,
) -> Result<Option<Range>> {
    let mut range = if section {
        Some(Range::at(ctx.scan.last_range().beg.clone()))
    } else {
        None
    };

    loop {
        let tok = ctx.scan.next_token()?;

        if tok.kind == TokenKind::Eof {
            if let Some(range) = &range {
                return Err(diag::error_at_point(&range.beg, "unexpected end of file".into()));
            }
            return Ok(None);
        }

        if let Some(range) = &mut range {
            range.end = tok.range.end.clone();
        }

        match tok.kind {
            TokenKind::Newline => continue,
            TokenKind::Ident => {
                let Some(kw) = find(table, &tok.text) else {
                    return Err(diag::error_at(&tok.range, "unrecognized keyword".into()));
                };
                match (kw.handler)(target, ctx)? {
                    Action::Ok => {
                        let term = ctx.scan.next_token()?;
                        if !matches!(term.kind, TokenKind::Newline | TokenKind::Eof) {
                            return Err(diag::error_at(
                                &term.range,
                                format!("unexpected {}", term.kind.name()),
                            ));
                        }
                    }
                    Action::OkNoNewline => {}
                    Action::End => break,
                }
            }
            _ => return Err(diag::error_at(&tok.range, "syntax error".into())),
        }
    }

    Ok(range)
}
