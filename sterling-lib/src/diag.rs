//! Source locations and diagnostic emission.
//!
//! A [`Point`] is a (file, line, column) coordinate; a [`Range`] spans
//! two points. Both format the way the rest of the toolchain expects:
//! `file:line`, `file:line.col`, `file:line.col-col2`,
//! `file:line.col-line2.col2` or `fileA:…-fileB:…` depending on how
//! much the two ends share. A column of 0 means "unknown" and is
//! omitted.
//!
//! Diagnostics are composed here and sent to the log sink at error
//! severity; the returned [`ConfigError`] propagates the failure
//! without re-reporting.

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub file: Arc<str>,
    pub line: u32,
    pub col: u32,
}

impl Point {
    pub fn new(file: Arc<str>) -> Self {
        Point { file, line: 1, col: 0 }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)?;
        if self.col != 0 {
            write!(f, ".{}", self.col)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub beg: Point,
    pub end: Point,
}

impl Range {
    pub fn at(point: Point) -> Self {
        Range { beg: point.clone(), end: point }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.beg)?;
        if self.beg.file != self.end.file {
            write!(f, "-{}", self.end)?;
        } else if self.beg.line != self.end.line {
            write!(f, "-{}", self.end.line)?;
            if self.end.col != 0 {
                write!(f, ".{}", self.end.col)?;
            }
        } else if self.beg.col != 0 && self.beg.col != self.end.col {
            write!(f, "-{}", self.end.col)?;
        }
        Ok(())
    }
}

/// Report an error at a source range and return the failure to
/// propagate.
pub fn error_at(range: &Range, message: String) -> ConfigError {
    let locus = range.to_string();
    error!("{locus}: {message}");
    ConfigError::Parse { locus, message }
}

/// Report an error at a single source point.
pub fn error_at_point(point: &Point, message: String) -> ConfigError {
    let locus = point.to_string();
    error!("{locus}: {message}");
    ConfigError::Parse { locus, message }
}

/// Report an error with no source location (used before any input is
/// open).
pub fn error_nolocus(message: String) -> ConfigError {
    error!("{message}");
    ConfigError::Message(message)
}

/// Emit a secondary or warning line without failing the parse.
pub fn report_at(range: &Range, message: &str) {
    error!("{range}: {message}");
}

/// Emit a secondary line anchored at a single point.
pub fn report_at_point(point: &Point, message: &str) {
    error!("{point}: {message}");
}

/// Report a regular-expression compilation failure, echoing the
/// offending expression when the caller still has it.
pub fn regex_error(range: &Range, err: &regex::Error, expr: Option<&str>) -> ConfigError {
    let failure = error_at(range, err.to_string());
    if let Some(expr) = expr {
        report_at(range, &format!("regular expression: {expr}"));
    }
    failure
}

/// Report a TLS library failure under the operation that hit it.
pub fn tls_error(range: &Range, what: &str, err: impl fmt::Display) -> ConfigError {
    error_at(range, format!("{what}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(file: &str, line: u32, col: u32) -> Point {
        Point { file: Arc::from(file), line, col }
    }

    #[test]
    fn point_formats_without_zero_column() {
        assert_eq!(point("a.cfg", 3, 0).to_string(), "a.cfg:3");
        assert_eq!(point("a.cfg", 3, 7).to_string(), "a.cfg:3.7");
    }

    #[test]
    fn range_formats_compactly() {
        let same_line = Range { beg: point("a.cfg", 2, 3), end: point("a.cfg", 2, 9) };
        assert_eq!(same_line.to_string(), "a.cfg:2.3-9");

        let multi_line = Range { beg: point("a.cfg", 2, 3), end: point("a.cfg", 4, 1) };
        assert_eq!(multi_line.to_string(), "a.cfg:2.3-4.1");

        let cross_file = Range { beg: point("a.cfg", 2, 3), end: point("b.cfg", 1, 1) };
        assert_eq!(cross_file.to_string(), "a.cfg:2.3-b.cfg:1.1");
    }

    #[test]
    fn range_collapses_when_ends_coincide() {
        let r = Range { beg: point("a.cfg", 2, 3), end: point("a.cfg", 2, 3) };
        assert_eq!(r.to_string(), "a.cfg:2.3");
    }
}
