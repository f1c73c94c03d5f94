//! Backend blocks: real upstreams, with optional high-availability
//! probe address and client-side TLS.

use crate::config::addr::{self, AddrSpec};
use crate::config::parser::{parse_end, parser_loop, Action, Ctx, Keyword};
use crate::config::value;
use crate::config::Defaults;
use crate::diag;
use crate::error::Result;
use crate::tls::{build_backend_tls, params, BackendTls, ClientTlsBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// A real upstream server.
    Backend,
    /// An HTTP redirect response template.
    Redirect,
    /// Files served from an ACME challenge directory.
    Acme,
}

#[derive(Debug)]
pub struct Backend {
    pub kind: BackendKind,
    pub addr: AddrSpec,
    /// Where the health prober connects; defaults to the backend
    /// address when `HAport` gives only a port.
    pub ha_addr: AddrSpec,
    pub priority: i32,
    pub to: u32,
    pub conn_to: u32,
    pub ws_to: u32,
    pub alive: bool,
    pub disabled: bool,
    /// Redirect or ACME target template.
    pub url: Option<String>,
    pub redir_code: u16,
    /// Length of the path component matched in the redirect template.
    pub redir_path_len: usize,
    pub tls: Option<BackendTls>,
}

impl Backend {
    pub fn new(dfl: &Defaults) -> Backend {
        Backend {
            kind: BackendKind::Backend,
            addr: AddrSpec::default(),
            ha_addr: AddrSpec::default(),
            priority: 5,
            to: dfl.be_to,
            conn_to: dfl.be_connto,
            ws_to: dfl.ws_to,
            alive: true,
            disabled: false,
            url: None,
            redir_code: 302,
            redir_path_len: 0,
            tls: None,
        }
    }
}

/// Parse-time state for one backend block.
pub struct BackendBuilder {
    be: Backend,
    tls: Option<ClientTlsBuilder>,
}

fn be_address(b: &mut BackendBuilder, ctx: &mut Ctx) -> Result<Action> {
    addr::assign_address(&mut b.be.addr, ctx)?;
    Ok(Action::Ok)
}

fn be_port(b: &mut BackendBuilder, ctx: &mut Ctx) -> Result<Action> {
    addr::assign_port(&mut b.be.addr, ctx)?;
    Ok(Action::Ok)
}

fn be_priority(b: &mut BackendBuilder, ctx: &mut Ctx) -> Result<Action> {
    b.be.priority = value::int_range(ctx, 0, 9)?;
    Ok(Action::Ok)
}

fn be_timeout(b: &mut BackendBuilder, ctx: &mut Ctx) -> Result<Action> {
    b.be.to = value::timeout(ctx)?;
    Ok(Action::Ok)
}

fn be_ws_timeout(b: &mut BackendBuilder, ctx: &mut Ctx) -> Result<Action> {
    b.be.ws_to = value::timeout(ctx)?;
    Ok(Action::Ok)
}

fn be_conn_timeout(b: &mut BackendBuilder, ctx: &mut Ctx) -> Result<Action> {
    b.be.conn_to = value::timeout(ctx)?;
    Ok(Action::Ok)
}

/// `HAport [address] port`. The single-argument form inherits the
/// backend's own address.
fn be_haport(b: &mut BackendBuilder, ctx: &mut Ctx) -> Result<Action> {
    if b.be.ha_addr.has_address() {
        return Err(diag::error_at(ctx.scan.last_range(), "Duplicate HAport statement".into()));
    }

    let first = ctx.scan.any()?;
    let second = ctx.scan.any()?;

    if value::is_newline(&second) {
        b.be.ha_addr = b.be.addr.clone();
        ctx.scan.pushback(second);
        addr::port_from_token(&mut b.be.ha_addr, &first)?;
    } else {
        b.be.ha_addr.addr = Some(addr::address_from_token(&first, ctx)?);
        addr::port_from_token(&mut b.be.ha_addr, &second)?;
    }
    Ok(Action::Ok)
}

fn be_https(b: &mut BackendBuilder, _ctx: &mut Ctx) -> Result<Action> {
    b.tls = Some(ClientTlsBuilder::default());
    Ok(Action::Ok)
}

fn be_cert(b: &mut BackendBuilder, ctx: &mut Ctx) -> Result<Action> {
    let Some(tls) = b.tls.as_mut() else {
        return Err(diag::error_at(
            ctx.scan.last_range(),
            "HTTPS must be used before this statement".into(),
        ));
    };
    let tok = ctx.scan.expect(crate::scan::TokenMask::STRING)?;
    tls.cert = Some(crate::tls::context::load_chain_and_key(&tok.text, &tok.range)?);
    Ok(Action::Ok)
}

fn be_ciphers(b: &mut BackendBuilder, ctx: &mut Ctx) -> Result<Action> {
    if b.tls.is_none() {
        return Err(diag::error_at(
            ctx.scan.last_range(),
            "HTTPS must be used before this statement".into(),
        ));
    }
    let ciphers = value::string(ctx)?;
    b.tls.as_mut().expect("checked above").ciphers = Some(ciphers);
    Ok(Action::Ok)
}

fn be_disable(b: &mut BackendBuilder, ctx: &mut Ctx) -> Result<Action> {
    let Some(tls) = b.tls.as_mut() else {
        return Err(diag::error_at(
            ctx.scan.last_range(),
            "HTTPS must be used before this statement".into(),
        ));
    };
    params::parse_proto_disable(&mut tls.disabled, ctx)?;
    Ok(Action::Ok)
}

static BACKEND_TABLE: &[Keyword<BackendBuilder>] = &[
    Keyword { name: "End", handler: parse_end },
    Keyword { name: "Address", handler: be_address },
    Keyword { name: "Port", handler: be_port },
    Keyword { name: "Priority", handler: be_priority },
    Keyword { name: "TimeOut", handler: be_timeout },
    Keyword { name: "WSTimeOut", handler: be_ws_timeout },
    Keyword { name: "ConnTO", handler: be_conn_timeout },
    Keyword { name: "HAport", handler: be_haport },
    Keyword { name: "HTTPS", handler: be_https },
    Keyword { name: "Cert", handler: be_cert },
    Keyword { name: "Ciphers", handler: be_ciphers },
    Keyword { name: "Disable", handler: be_disable },
];

static EMERGENCY_TABLE: &[Keyword<BackendBuilder>] = &[
    Keyword { name: "End", handler: parse_end },
    Keyword { name: "Address", handler: be_address },
    Keyword { name: "Port", handler: be_port },
    Keyword { name: "TimeOut", handler: be_timeout },
    Keyword { name: "WSTimeOut", handler: be_ws_timeout },
    Keyword { name: "ConnTO", handler: be_conn_timeout },
    Keyword { name: "HTTPS", handler: be_https },
    Keyword { name: "Cert", handler: be_cert },
    Keyword { name: "Ciphers", handler: be_ciphers },
    Keyword { name: "Disable", handler: be_disable },
];

fn parse_backend_internal(table: &[Keyword<BackendBuilder>], ctx: &mut Ctx) -> Result<Backend> {
    let mut builder = BackendBuilder { be: Backend::new(ctx.dfl), tls: None };

    let range = parser_loop(table, &mut builder, ctx, true)?.expect("section range");
    addr::check(&builder.be.addr, &range, "Backend")?;

    let mut be = builder.be;
    if let Some(tls) = builder.tls {
        be.tls = Some(build_backend_tls(tls, &range)?);
    }
    Ok(be)
}

pub fn parse_backend_into(head: &mut Vec<Backend>, ctx: &mut Ctx) -> Result<Action> {
    let be = parse_backend_internal(BACKEND_TABLE, ctx)?;
    head.push(be);
    Ok(Action::Ok)
}

/// The emergency backend parses with fixed 120 second timeouts, not
/// the configured defaults.
pub fn parse_emergency_into(slot: &mut Option<Backend>, ctx: &mut Ctx) -> Result<Action> {
    let mut dfl = ctx.dfl.clone();
    dfl.be_to = 120;
    dfl.be_connto = 120;
    dfl.ws_to = 120;
    let mut ectx = Ctx { scan: &mut *ctx.scan, dfl: &mut dfl, features: ctx.features };
    let be = parse_backend_internal(EMERGENCY_TABLE, &mut ectx)?;
    *slot = Some(be);
    Ok(Action::Ok)
}
