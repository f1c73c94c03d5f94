//! Service blocks: request classification rules, the backend pool,
//! and sticky-session configuration.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use regex::Regex;

use crate::config::backend::{parse_backend_into, parse_emergency_into, Backend, BackendKind};
use crate::config::parser::{parse_end, parser_loop, Action, Ctx, Keyword};
use crate::config::value::{self, Matcher};
use crate::diag::{self, Range};
use crate::error::Result;
use crate::scan::{TokenKind, TokenMask};

/// Service names longer than this are truncated.
pub const SERVICE_NAME_MAX: usize = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    None,
    Ip,
    Cookie,
    Url,
    Parm,
    Basic,
    Header,
}

#[derive(Debug)]
pub struct Service {
    pub name: Option<String>,
    pub url: Vec<Matcher>,
    pub req_head: Vec<Matcher>,
    pub deny_head: Vec<Matcher>,
    pub backends: Vec<Backend>,
    pub emergency: Option<Backend>,
    pub sess_type: SessionType,
    pub sess_ttl: u32,
    /// Locates the session key in the raw request.
    pub sess_start: Option<Matcher>,
    /// Extracts the session value after the key.
    pub sess_pat: Option<Matcher>,
    pub disabled: bool,
    /// Sum of priorities over enabled backends.
    pub tot_pri: i32,
    /// Sum of priorities over all backends.
    pub abs_pri: i32,
    /// Sticky-session table, session key to backend index. Shared
    /// with the worker threads at runtime.
    pub sessions: Mutex<HashMap<String, usize>>,
}

impl Service {
    fn new() -> Service {
        Service {
            name: None,
            url: Vec::new(),
            req_head: Vec::new(),
            deny_head: Vec::new(),
            backends: Vec::new(),
            emergency: None,
            sess_type: SessionType::None,
            sess_ttl: 0,
            sess_start: None,
            sess_pat: None,
            disabled: false,
            tot_pri: 0,
            abs_pri: 0,
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

/// Parse-time extension of a service: URL patterns are kept as raw
/// strings and compiled only when the section closes, so an
/// `IgnoreCase` statement anywhere in the section affects them all.
pub struct ServiceBuilder {
    svc: Service,
    url_toks: Vec<(String, Range)>,
    ignore_case: bool,
}

fn svc_url(sb: &mut ServiceBuilder, ctx: &mut Ctx) -> Result<Action> {
    value::token_list(ctx, &mut sb.url_toks)?;
    Ok(Action::Ok)
}

fn svc_ignore_case(sb: &mut ServiceBuilder, ctx: &mut Ctx) -> Result<Action> {
    sb.ignore_case = value::bool_value(ctx)?;
    Ok(Action::Ok)
}

fn svc_head_require(sb: &mut ServiceBuilder, ctx: &mut Ctx) -> Result<Action> {
    sb.svc.req_head.push(value::matcher_line(ctx)?);
    Ok(Action::Ok)
}

fn svc_head_deny(sb: &mut ServiceBuilder, ctx: &mut Ctx) -> Result<Action> {
    sb.svc.deny_head.push(value::matcher_line(ctx)?);
    Ok(Action::Ok)
}

fn svc_disabled(sb: &mut ServiceBuilder, ctx: &mut Ctx) -> Result<Action> {
    sb.svc.disabled = value::bool_value(ctx)?;
    Ok(Action::Ok)
}

fn svc_redirect(sb: &mut ServiceBuilder, ctx: &mut Ctx) -> Result<Action> {
    parse_redirect(&mut sb.svc.backends, ctx)
}

fn svc_backend(sb: &mut ServiceBuilder, ctx: &mut Ctx) -> Result<Action> {
    parse_backend_into(&mut sb.svc.backends, ctx)
}

fn svc_emergency(sb: &mut ServiceBuilder, ctx: &mut Ctx) -> Result<Action> {
    parse_emergency_into(&mut sb.svc.emergency, ctx)
}

fn svc_session(sb: &mut ServiceBuilder, ctx: &mut Ctx) -> Result<Action> {
    parse_session(&mut sb.svc, ctx)
}

static SERVICE_TABLE: &[Keyword<ServiceBuilder>] = &[
    Keyword { name: "End", handler: parse_end },
    Keyword { name: "URL", handler: svc_url },
    Keyword { name: "IgnoreCase", handler: svc_ignore_case },
    Keyword { name: "HeadRequire", handler: svc_head_require },
    Keyword { name: "HeadDeny", handler: svc_head_deny },
    Keyword { name: "Disabled", handler: svc_disabled },
    Keyword { name: "Redirect", handler: svc_redirect },
    Keyword { name: "Backend", handler: svc_backend },
    Keyword { name: "Emergency", handler: svc_emergency },
    Keyword { name: "Session", handler: svc_session },
];

/// Parse a `Service [name] … End` section into `head`.
pub fn parse_service_into(head: &mut Vec<Service>, ctx: &mut Ctx) -> Result<Action> {
    let mut sb = ServiceBuilder {
        svc: Service::new(),
        url_toks: Vec::new(),
        ignore_case: ctx.dfl.ignore_case,
    };

    let tok = ctx.scan.any()?;
    if tok.kind == TokenKind::String {
        let mut name = tok.text;
        if name.len() > SERVICE_NAME_MAX {
            diag::report_at(&tok.range, "service name too long: truncated");
            let mut cut = SERVICE_NAME_MAX;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }
        sb.svc.name = Some(name);
    } else {
        ctx.scan.pushback(tok);
    }

    let range = parser_loop(SERVICE_TABLE, &mut sb, ctx, true)?.expect("section range");

    let mut svc = sb.svc;
    if svc.backends.is_empty() {
        diag::report_at(&range, "warning: no backends defined");
    } else {
        for be in &svc.backends {
            if !be.disabled {
                svc.tot_pri += be.priority;
            }
            svc.abs_pri += be.priority;
        }
    }

    for (expr, range) in sb.url_toks {
        let m = Matcher::compile(&expr, sb.ignore_case)
            .map_err(|e| diag::regex_error(&range, &e, None))?;
        svc.url.push(m);
    }

    head.push(svc);
    Ok(Action::Ok)
}

/// Session section state, validated and turned into the two
/// extraction regexes when the section closes.
#[derive(Default)]
struct SessionBuilder {
    sess_type: Option<SessionType>,
    id: Option<String>,
    ttl: u32,
}

fn sess_type(sp: &mut SessionBuilder, ctx: &mut Ctx) -> Result<Action> {
    let tok = ctx.scan.expect(TokenMask::IDENT)?;
    let ty = match tok.text.to_ascii_uppercase().as_str() {
        "IP" => SessionType::Ip,
        "COOKIE" => SessionType::Cookie,
        "URL" => SessionType::Url,
        "PARM" => SessionType::Parm,
        "BASIC" => SessionType::Basic,
        "HEADER" => SessionType::Header,
        _ => return Err(diag::error_at(&tok.range, "Unknown Session type".into())),
    };
    sp.sess_type = Some(ty);
    Ok(Action::Ok)
}

fn sess_ttl(sp: &mut SessionBuilder, ctx: &mut Ctx) -> Result<Action> {
    sp.ttl = value::timeout(ctx)?;
    Ok(Action::Ok)
}

fn sess_id(sp: &mut SessionBuilder, ctx: &mut Ctx) -> Result<Action> {
    sp.id = Some(value::string(ctx)?);
    Ok(Action::Ok)
}

static SESSION_TABLE: &[Keyword<SessionBuilder>] = &[
    Keyword { name: "End", handler: parse_end },
    Keyword { name: "Type", handler: sess_type },
    Keyword { name: "TTL", handler: sess_ttl },
    Keyword { name: "ID", handler: sess_id },
];

fn parse_session(svc: &mut Service, ctx: &mut Ctx) -> Result<Action> {
    let mut sp = SessionBuilder::default();
    let range = parser_loop(SESSION_TABLE, &mut sp, ctx, true)?.expect("section range");

    let Some(ty) = sp.sess_type else {
        return Err(diag::error_at(&range, "Session type not defined".into()));
    };
    if sp.ttl == 0 {
        return Err(diag::error_at(&range, "Session TTL not defined".into()));
    }
    if matches!(ty, SessionType::Cookie | SessionType::Url | SessionType::Header)
        && sp.id.is_none()
    {
        return Err(diag::error_at(ctx.scan.last_range(), "Session ID not defined".into()));
    }

    let id = sp.id.as_deref().unwrap_or_default();
    let (start, pat): (Option<String>, Option<&str>) = match ty {
        SessionType::Cookie => (Some(format!("Cookie[^:]*:.*[ \t]{id}=")), Some("([^;]*)")),
        SessionType::Url => (Some(format!("[?&]{id}=")), Some("([^&;#]*)")),
        SessionType::Parm => (Some(";".into()), Some("([^?]*)")),
        SessionType::Basic => {
            (Some("Authorization:[ \t]*Basic[ \t]*".into()), Some("([^ \t]*)"))
        }
        SessionType::Header => (Some(format!("{id}:[ \t]*")), Some("([^ \t]*)")),
        SessionType::Ip | SessionType::None => (None, None),
    };

    if let Some(expr) = start {
        svc.sess_start = Some(value::compile_matcher(&expr, true, ctx.scan.last_range())?);
    }
    if let Some(expr) = pat {
        svc.sess_pat = Some(value::compile_matcher(expr, true, ctx.scan.last_range())?);
    }

    svc.sess_ttl = sp.ttl;
    svc.sess_type = ty;
    Ok(Action::Ok)
}

/// The redirect URL grammar: scheme, host, and whatever path follows.
fn location_regex() -> &'static Regex {
    static LOCATION: OnceLock<Regex> = OnceLock::new();
    LOCATION.get_or_init(|| {
        regex::RegexBuilder::new("(http|https)://([^/]+)(.*)")
            .case_insensitive(true)
            .multi_line(true)
            .build()
            .expect("redirect grammar compiles")
    })
}

/// `Redirect [code] "url"` adds a redirect pseudo-backend.
fn parse_redirect(head: &mut Vec<Backend>, ctx: &mut Ctx) -> Result<Action> {
    let mut code = 302;
    let mut tok = ctx.scan.any()?;

    if tok.kind == TokenKind::Number {
        match tok.text.parse::<u16>() {
            Ok(n @ (301 | 302 | 307)) => code = n,
            _ => return Err(diag::error_at(&tok.range, "invalid status code".into())),
        }
        tok = ctx.scan.any()?;
    }

    if tok.kind != TokenKind::String {
        return Err(diag::error_at(
            &tok.range,
            format!("expected quoted string, but found {}", tok.kind.name()),
        ));
    }

    let mut url = tok.text;
    let (path_start, path_len) = {
        let Some(caps) = location_regex().captures(&url) else {
            return Err(diag::error_at(&tok.range, "Redirect bad URL".into()));
        };
        let path = caps.get(3).expect("path group");
        (path.start(), path.len())
    };
    if path_len == 1 {
        // the path is a single '/', so remove it
        url.truncate(path_start);
    }

    let mut be = Backend::new(ctx.dfl);
    be.kind = BackendKind::Redirect;
    be.redir_code = code;
    be.priority = 1;
    be.alive = true;
    be.url = Some(url);
    be.redir_path_len = path_len;
    head.push(be);

    Ok(Action::Ok)
}

/// `ACME "directory"` synthesises a service answering http-01
/// challenges from the given directory.
pub fn parse_acme_into(head: &mut Vec<Service>, ctx: &mut Ctx) -> Result<Action> {
    const ACME_PATTERN: &str = "^/\\.well-known/acme-challenge/(.+)";

    let tok = ctx.scan.expect(TokenMask::STRING)?;
    let dir = &tok.text;

    let meta = std::fs::metadata(dir)
        .map_err(|e| diag::error_at(&tok.range, format!("can't stat {dir}: {e}")))?;
    if !meta.is_dir() {
        return Err(diag::error_at(&tok.range, format!("{dir} is not a directory")));
    }

    let mut svc = Service::new();
    let m = Matcher::compile(ACME_PATTERN, false)
        .map_err(|e| diag::regex_error(&tok.range, &e, None))?;
    svc.url.push(m);
    svc.tot_pri = 1;
    svc.abs_pri = 1;

    let mut be = Backend::new(ctx.dfl);
    be.kind = BackendKind::Acme;
    be.priority = 1;
    be.alive = true;
    let trimmed = dir.strip_suffix('/').unwrap_or(dir);
    be.url = Some(format!("{trimmed}/$1"));
    svc.backends.push(be);

    head.push(svc);
    Ok(Action::Ok)
}
