//! Typed leaf parsers for statement arguments.

use std::fs;

use regex::RegexBuilder;

use crate::config::parser::Ctx;
use crate::diag::{self, Range};
use crate::error::Result;
use crate::scan::{Token, TokenKind, TokenMask};

/// Upper bound on files read whole into memory (custom error bodies).
pub const ERROR_FILE_MAX: u64 = 1024 * 1024;

/// A compiled request matcher: extended syntax, newline-aware,
/// optionally case-folded.
#[derive(Debug, Clone)]
pub struct Matcher {
    re: regex::Regex,
}

impl Matcher {
    pub fn compile(expr: &str, ignore_case: bool) -> std::result::Result<Matcher, regex::Error> {
        RegexBuilder::new(expr)
            .case_insensitive(ignore_case)
            .multi_line(true)
            .build()
            .map(|re| Matcher { re })
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.re.is_match(haystack)
    }

    pub fn find<'h>(&self, haystack: &'h str) -> Option<regex::Match<'h>> {
        self.re.find(haystack)
    }

    pub fn captures<'h>(&self, haystack: &'h str) -> Option<regex::Captures<'h>> {
        self.re.captures(haystack)
    }

    pub fn pattern(&self) -> &str {
        self.re.as_str()
    }
}

/// Compile a matcher, reporting failures at `range`.
pub fn compile_matcher(expr: &str, ignore_case: bool, range: &Range) -> Result<Matcher> {
    Matcher::compile(expr, ignore_case).map_err(|e| diag::regex_error(range, &e, Some(expr)))
}

pub fn string(ctx: &mut Ctx) -> Result<String> {
    Ok(ctx.scan.expect(TokenMask::STRING)?.text)
}

/// Read a whole file named by a quoted string, e.g. a custom error
/// body. The read is capped at [`ERROR_FILE_MAX`].
pub fn string_from_file(ctx: &mut Ctx) -> Result<String> {
    let tok = ctx.scan.expect(TokenMask::STRING)?;
    let path = &tok.text;
    let meta = fs::metadata(path)
        .map_err(|e| diag::error_at(&tok.range, format!("can't stat {path}: {e}")))?;
    if meta.len() > ERROR_FILE_MAX {
        return Err(diag::error_at(
            &tok.range,
            format!("{path}: file too large (limit is {ERROR_FILE_MAX} bytes)"),
        ));
    }
    let data = fs::read(path)
        .map_err(|e| diag::error_at(&tok.range, format!("can't open {path}: {e}")))?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

pub fn bool_value(ctx: &mut Ctx) -> Result<bool> {
    let tok = ctx.scan.expect(TokenMask::UNQUOTED)?;
    match tok.text.as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => {
            let err = diag::error_at(&tok.range, "not a boolean value".into());
            diag::report_at(
                &tok.range,
                "valid booleans are: 1, yes, true, on for true value, and 0, no, false, off for false value",
            );
            Err(err)
        }
    }
}

pub fn unsigned(ctx: &mut Ctx) -> Result<u32> {
    let tok = ctx.scan.expect(TokenMask::NUMBER)?;
    tok.text
        .parse::<u32>()
        .map_err(|_| diag::error_at(&tok.range, "bad unsigned number".into()))
}

pub fn timeout(ctx: &mut Ctx) -> Result<u32> {
    unsigned(ctx)
}

pub fn int(ctx: &mut Ctx) -> Result<i32> {
    let tok = ctx.scan.expect(TokenMask::NUMBER)?;
    tok.text
        .parse::<i32>()
        .map_err(|_| diag::error_at(&tok.range, "bad integer number".into()))
}

pub fn int_range(ctx: &mut Ctx, min: i32, max: i32) -> Result<i32> {
    let n = int(ctx)?;
    if !(min <= n && n <= max) {
        return Err(diag::error_at(
            ctx.scan.last_range(),
            format!("value out of allowed range ({min}..{max})"),
        ));
    }
    Ok(n)
}

pub fn long(ctx: &mut Ctx) -> Result<i64> {
    let tok = ctx.scan.expect(TokenMask::NUMBER)?;
    tok.text
        .parse::<i64>()
        .map_err(|_| diag::error_at(&tok.range, "bad long number".into()))
}

/// Syslog facility names accepted by `LogFacility`; `-` disables
/// syslog entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    None,
    Auth,
    AuthPriv,
    Cron,
    Daemon,
    Ftp,
    Kern,
    Lpr,
    Mail,
    News,
    Syslog,
    User,
    Uucp,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

const FACILITY_TABLE: &[(&str, Facility)] = &[
    ("auth", Facility::Auth),
    ("authpriv", Facility::AuthPriv),
    ("cron", Facility::Cron),
    ("daemon", Facility::Daemon),
    ("ftp", Facility::Ftp),
    ("kern", Facility::Kern),
    ("lpr", Facility::Lpr),
    ("mail", Facility::Mail),
    ("news", Facility::News),
    ("syslog", Facility::Syslog),
    ("user", Facility::User),
    ("uucp", Facility::Uucp),
    ("local0", Facility::Local0),
    ("local1", Facility::Local1),
    ("local2", Facility::Local2),
    ("local3", Facility::Local3),
    ("local4", Facility::Local4),
    ("local5", Facility::Local5),
    ("local6", Facility::Local6),
    ("local7", Facility::Local7),
];

pub fn log_facility(ctx: &mut Ctx) -> Result<Facility> {
    let tok = ctx.scan.expect(TokenMask::UNQUOTED)?;
    if tok.text == "-" {
        return Ok(Facility::None);
    }
    FACILITY_TABLE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&tok.text))
        .map(|(_, fac)| *fac)
        .ok_or_else(|| diag::error_at(&tok.range, "unknown log facility name".into()))
}

pub fn log_level(ctx: &mut Ctx) -> Result<i32> {
    let n = unsigned(ctx)?;
    i32::try_from(n)
        .map_err(|_| diag::error_at(ctx.scan.last_range(), "log level out of allowed range".into()))
}

/// Compile a quoted regular expression; always case-folded (used for
/// header matchers).
pub fn matcher_line(ctx: &mut Ctx) -> Result<Matcher> {
    let tok = ctx.scan.expect(TokenMask::STRING)?;
    Matcher::compile(&tok.text, true).map_err(|e| diag::regex_error(&tok.range, &e, None))
}

/// Collect a quoted string together with its source range for
/// deferred compilation.
pub fn token_list(ctx: &mut Ctx, list: &mut Vec<(String, Range)>) -> Result<()> {
    let tok = ctx.scan.expect(TokenMask::STRING)?;
    list.push((tok.text, tok.range));
    Ok(())
}

/// Append a quoted string to a CRLF-joined header block.
pub fn append_crlf_line(ctx: &mut Ctx, dst: &mut Option<String>) -> Result<()> {
    let line = string(ctx)?;
    match dst {
        Some(s) => {
            s.push_str("\r\n");
            s.push_str(&line);
        }
        None => *dst = Some(line),
    }
    Ok(())
}

pub fn is_newline(tok: &Token) -> bool {
    tok.kind == TokenKind::Newline
}
