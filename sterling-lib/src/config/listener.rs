//! Listener blocks: the sockets the proxy accepts on, their HTTP
//! policy, and (for `ListenHTTPS`) the TLS contexts with SNI.

use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use nix::sys::socket::{getsockname, recvmsg, ControlMessageOwned, MsgFlags, SockaddrStorage};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, CertificateRevocationListDer};
use tokio_rustls::rustls::{RootCertStore, ServerConfig};

use crate::config::addr::{self, AddrSpec, SockAddr};
use crate::config::parser::{parse_end, parser_loop, Action, Ctx, Keyword};
use crate::config::service::{parse_acme_into, parse_service_into, Service};
use crate::config::value::{self, Matcher};
use crate::config::Defaults;
use crate::diag::{self, Range};
use crate::error::Result;
use crate::scan::TokenMask;
use crate::tls::{client_verifier, params, CertContext, ProtoSet, SniResolver};

/// Request-line patterns selected by `xHTTP`, from the plain trio up
/// to the full WebDAV and RPC vocabulary.
pub static XHTTP: [&str; 5] = [
    "^(GET|POST|HEAD) ([^ ]+) HTTP/1.[01]$",
    "^(GET|POST|HEAD|PUT|PATCH|DELETE) ([^ ]+) HTTP/1.[01]$",
    "^(GET|POST|HEAD|PUT|PATCH|DELETE|LOCK|UNLOCK|PROPFIND|PROPPATCH|SEARCH|MKCOL|MOVE|COPY|OPTIONS|TRACE|MKACTIVITY|CHECKOUT|MERGE|REPORT) ([^ ]+) HTTP/1.[01]$",
    "^(GET|POST|HEAD|PUT|PATCH|DELETE|LOCK|UNLOCK|PROPFIND|PROPPATCH|SEARCH|MKCOL|MOVE|COPY|OPTIONS|TRACE|MKACTIVITY|CHECKOUT|MERGE|REPORT|SUBSCRIBE|UNSUBSCRIBE|BPROPPATCH|POLL|BMOVE|BCOPY|BDELETE|BPROPFIND|NOTIFY|CONNECT) ([^ ]+) HTTP/1.[01]$",
    "^(GET|POST|HEAD|PUT|PATCH|DELETE|LOCK|UNLOCK|PROPFIND|PROPPATCH|SEARCH|MKCOL|MOVE|COPY|OPTIONS|TRACE|MKACTIVITY|CHECKOUT|MERGE|REPORT|SUBSCRIBE|UNSUBSCRIBE|BPROPPATCH|POLL|BMOVE|BCOPY|BDELETE|BPROPFIND|NOTIFY|CONNECT|RPC_IN_DATA|RPC_OUT_DATA) ([^ ]+) HTTP/1.[01]$",
];

/// TLS settings of an HTTPS listener after assembly.
#[derive(Debug)]
pub struct ListenerTls {
    /// One entry per `Cert` statement, in order; the first is the
    /// SNI fallback.
    pub contexts: Vec<CertContext>,
    pub server_config: Arc<ServerConfig>,
    pub client_check: i32,
    pub verify_depth: i32,
    pub ciphers: Option<String>,
    pub disabled: ProtoSet,
    pub honor_cipher_order: Option<bool>,
    pub allow_client_reneg: i32,
    pub no_https11: i32,
}

#[derive(Debug)]
pub struct Listener {
    pub addr: AddrSpec,
    /// Listening descriptor adopted from a sibling process via
    /// `SocketFrom`.
    pub sock: Option<RawFd>,
    /// Request-line accept pattern.
    pub verb: Matcher,
    /// Client idle timeout.
    pub to: u32,
    pub url_pat: Option<Matcher>,
    pub err404: String,
    pub err413: String,
    pub err414: String,
    pub err500: String,
    pub err501: String,
    pub err503: String,
    pub max_req: i64,
    pub head_off: Vec<Matcher>,
    pub add_head: Option<String>,
    pub rewr_loc: i32,
    pub rewr_dest: bool,
    pub log_level: i32,
    pub services: Vec<Service>,
    pub tls: Option<ListenerTls>,
}

impl Listener {
    fn new(dfl: &Defaults) -> Listener {
        Listener {
            addr: AddrSpec::default(),
            sock: None,
            verb: Matcher::compile(XHTTP[0], true).expect("builtin pattern compiles"),
            to: dfl.clnt_to,
            url_pat: None,
            err404: "Not Found.".into(),
            err413: "Request too large.".into(),
            err414: "Request URI is too long.".into(),
            err500: "An internal server error occurred. Please try again later.".into(),
            err501: "This method may not be used.".into(),
            err503: "The service is not available. Please try again later.".into(),
            max_req: 0,
            head_off: Vec::new(),
            add_head: None,
            rewr_loc: 1,
            rewr_dest: false,
            log_level: dfl.log_level,
            services: Vec::new(),
            tls: None,
        }
    }
}

/// TLS statements accumulated while parsing a `ListenHTTPS` section.
struct TlsState {
    contexts: Vec<CertContext>,
    /// Set once any non-`Cert` TLS statement has been seen; `Cert`
    /// must come first.
    has_other: bool,
    client_check: i32,
    verify_depth: i32,
    roots: RootCertStore,
    crls: Vec<CertificateRevocationListDer<'static>>,
    ciphers: Option<String>,
    disabled: ProtoSet,
    honor_cipher_order: Option<bool>,
    allow_client_reneg: i32,
    no_https11: i32,
}

impl Default for TlsState {
    fn default() -> Self {
        TlsState {
            contexts: Vec::new(),
            has_other: false,
            client_check: 0,
            verify_depth: 0,
            roots: RootCertStore::empty(),
            crls: Vec::new(),
            ciphers: None,
            disabled: ProtoSet::default(),
            honor_cipher_order: None,
            allow_client_reneg: 0,
            no_https11: 0,
        }
    }
}

/// Parse target for both listener flavours; `tls` is present only
/// under `ListenHTTPS`.
pub struct ListenerBuilder {
    lst: Listener,
    tls: Option<TlsState>,
}

fn lst_address(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    addr::assign_address(&mut lb.lst.addr, ctx)?;
    Ok(Action::Ok)
}

fn lst_port(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    addr::assign_port(&mut lb.lst.addr, ctx)?;
    Ok(Action::Ok)
}

/// `SocketFrom "path"`: connect to a sibling process over a UNIX
/// socket and adopt the listening descriptor it passes back.
fn lst_socket_from(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    if lb.lst.addr.has_address() {
        return Err(diag::error_at(
            ctx.scan.last_range(),
            "Duplicate Address or SocketFrom statement".into(),
        ));
    }

    let tok = ctx.scan.expect(TokenMask::STRING)?;
    let resolved = addr::address_from_token(&tok, ctx)?;
    let SockAddr::Unix(path) = resolved else {
        return Err(diag::error_at(&tok.range, "SocketFrom requires a UNIX socket path".into()));
    };

    let stream = UnixStream::connect(&path).map_err(|e| {
        diag::error_at(ctx.scan.last_range(), format!("connect {}: {e}", path.display()))
    })?;

    let fd = receive_fd(&stream)
        .map_err(|e| diag::error_at(ctx.scan.last_range(), format!("can't get socket: {e}")))?;

    let ss: SockaddrStorage = getsockname(fd).map_err(|e| {
        diag::error_at(ctx.scan.last_range(), format!("can't get socket address: {e}"))
    })?;
    let sockaddr = storage_to_addr(&ss).ok_or_else(|| {
        diag::error_at(ctx.scan.last_range(), "can't get socket address".into())
    })?;

    tracing::debug!("{}: obtained address {:?}", tok.range, sockaddr);

    lb.lst.addr = AddrSpec { addr: Some(sockaddr), has_port: true };
    lb.lst.sock = Some(fd);
    Ok(Action::Ok)
}

fn receive_fd(stream: &UnixStream) -> std::result::Result<RawFd, nix::Error> {
    let mut data = [0u8; 1];
    let mut iov = [std::io::IoSliceMut::new(&mut data)];
    let mut cmsg = nix::cmsg_space!([RawFd; 1]);
    let msg = recvmsg::<()>(stream.as_raw_fd(), &mut iov, Some(&mut cmsg), MsgFlags::empty())?;
    for c in msg.cmsgs()? {
        if let ControlMessageOwned::ScmRights(fds) = c {
            if let Some(fd) = fds.first() {
                return Ok(*fd);
            }
        }
    }
    Err(nix::Error::EBADF)
}

fn storage_to_addr(ss: &SockaddrStorage) -> Option<SockAddr> {
    use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
    if let Some(sin) = ss.as_sockaddr_in() {
        return Some(SockAddr::Inet(SocketAddr::V4(SocketAddrV4::new(sin.ip(), sin.port()))));
    }
    if let Some(sin6) = ss.as_sockaddr_in6() {
        return Some(SockAddr::Inet(SocketAddr::V6(SocketAddrV6::new(
            sin6.ip(),
            sin6.port(),
            sin6.flowinfo(),
            sin6.scope_id(),
        ))));
    }
    if let Some(sun) = ss.as_unix_addr() {
        return sun.path().map(|p| SockAddr::Unix(p.to_path_buf()));
    }
    None
}

fn lst_xhttp(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let n = value::unsigned(ctx)? as usize;
    if n >= XHTTP.len() {
        return Err(diag::error_at(ctx.scan.last_range(), "argument out of allowed range".into()));
    }
    lb.lst.verb = value::compile_matcher(XHTTP[n], true, ctx.scan.last_range())?;
    Ok(Action::Ok)
}

fn lst_client(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.to = value::timeout(ctx)?;
    Ok(Action::Ok)
}

fn lst_check_url(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    if lb.lst.url_pat.is_some() {
        return Err(diag::error_at(ctx.scan.last_range(), "CheckURL multiple pattern".into()));
    }
    let tok = ctx.scan.expect(TokenMask::STRING)?;
    let m = Matcher::compile(&tok.text, ctx.dfl.ignore_case)
        .map_err(|e| diag::regex_error(&tok.range, &e, None))?;
    lb.lst.url_pat = Some(m);
    Ok(Action::Ok)
}

fn lst_err404(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.err404 = value::string_from_file(ctx)?;
    Ok(Action::Ok)
}

fn lst_err413(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.err413 = value::string_from_file(ctx)?;
    Ok(Action::Ok)
}

fn lst_err414(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.err414 = value::string_from_file(ctx)?;
    Ok(Action::Ok)
}

fn lst_err500(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.err500 = value::string_from_file(ctx)?;
    Ok(Action::Ok)
}

fn lst_err501(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.err501 = value::string_from_file(ctx)?;
    Ok(Action::Ok)
}

fn lst_err503(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.err503 = value::string_from_file(ctx)?;
    Ok(Action::Ok)
}

fn lst_max_request(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.max_req = value::long(ctx)?;
    Ok(Action::Ok)
}

fn lst_head_remove(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.head_off.push(value::matcher_line(ctx)?);
    Ok(Action::Ok)
}

fn lst_rewrite_location(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.rewr_loc = value::int_range(ctx, 0, 2)?;
    Ok(Action::Ok)
}

fn lst_rewrite_destination(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.rewr_dest = value::bool_value(ctx)?;
    Ok(Action::Ok)
}

fn lst_log_level(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    lb.lst.log_level = value::int(ctx)?;
    Ok(Action::Ok)
}

fn lst_add_header(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    value::append_crlf_line(ctx, &mut lb.lst.add_head)?;
    Ok(Action::Ok)
}

fn lst_service(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    parse_service_into(&mut lb.lst.services, ctx)
}

fn lst_acme(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    parse_acme_into(&mut lb.lst.services, ctx)
}

fn tls_state(lb: &mut ListenerBuilder) -> &mut TlsState {
    // TLS statements appear only in the ListenHTTPS keyword table
    lb.tls.as_mut().expect("TLS statement outside ListenHTTPS")
}

/// `Cert` must precede every other TLS-specific statement in the
/// section.
fn https_cert(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let tls = tls_state(lb);
    if tls.has_other {
        return Err(diag::error_at(
            ctx.scan.last_range(),
            "Cert directives MUST precede other SSL-specific directives".into(),
        ));
    }
    let tok = ctx.scan.expect(TokenMask::STRING)?;
    let provider = params::provider_for_ciphers(None);
    tls.contexts.push(CertContext::load(&tok.text, &provider, &tok.range)?);
    Ok(Action::Ok)
}

fn require_certs<'s>(
    lb: &'s mut ListenerBuilder,
    ctx: &Ctx,
    stmt: &str,
) -> Result<&'s mut TlsState> {
    let tls = tls_state(lb);
    if tls.contexts.is_empty() {
        return Err(diag::error_at(
            ctx.scan.last_range(),
            format!("{stmt} may only be used after Cert"),
        ));
    }
    tls.has_other = true;
    Ok(tls)
}

/// `ClientCert mode [depth]`; a depth is expected for modes above 0.
fn https_client_cert(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let mode = {
        let _ = require_certs(lb, ctx, "ClientCert")?;
        value::int_range(ctx, 0, 3)?
    };
    let depth = if mode > 0 { value::int(ctx)? } else { 0 };
    let tls = lb.tls.as_mut().expect("checked above");
    tls.client_check = mode;
    tls.verify_depth = depth;
    Ok(Action::Ok)
}

fn https_disable(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let mut disabled = tls_state(lb).disabled;
    params::parse_proto_disable(&mut disabled, ctx)?;
    tls_state(lb).disabled = disabled;
    Ok(Action::Ok)
}

fn https_ciphers(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let _ = require_certs(lb, ctx, "Ciphers")?;
    let ciphers = value::string(ctx)?;
    lb.tls.as_mut().expect("checked above").ciphers = Some(ciphers);
    Ok(Action::Ok)
}

fn https_honor_cipher_order(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let v = value::bool_value(ctx)?;
    tls_state(lb).honor_cipher_order = Some(v);
    Ok(Action::Ok)
}

fn https_allow_client_renegotiation(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let v = value::int_range(ctx, 0, 2)?;
    tls_state(lb).allow_client_reneg = v;
    Ok(Action::Ok)
}

fn load_ca_file(tls: &mut TlsState, path: &str, range: &Range, what: &str) -> Result<()> {
    let data = std::fs::read(path)
        .map_err(|e| diag::error_at(range, format!("can't open {path}: {e}")))?;
    let certs = CertificateDer::pem_slice_iter(&data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| diag::tls_error(range, what, format!("{e:?}")))?;
    if certs.is_empty() {
        return Err(diag::error_at(range, format!("{path}: no certificates found")));
    }
    for cert in certs {
        tls.roots
            .add(cert)
            .map_err(|e| diag::tls_error(range, what, e))?;
    }
    Ok(())
}

fn https_calist(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let _ = require_certs(lb, ctx, "CAlist")?;
    let tok = ctx.scan.expect(TokenMask::STRING)?;
    let tls = lb.tls.as_mut().expect("checked above");
    load_ca_file(tls, &tok.text, &tok.range, "can't load client CA file")
        .map(|()| Action::Ok)
}

fn https_verifylist(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let _ = require_certs(lb, ctx, "VerifyList")?;
    let tok = ctx.scan.expect(TokenMask::STRING)?;
    let tls = lb.tls.as_mut().expect("checked above");
    load_ca_file(tls, &tok.text, &tok.range, "can't load verify locations")
        .map(|()| Action::Ok)
}

fn https_crlist(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let _ = require_certs(lb, ctx, "CRLlist")?;
    let tok = ctx.scan.expect(TokenMask::STRING)?;
    let data = std::fs::read(&tok.text)
        .map_err(|e| diag::error_at(&tok.range, format!("can't open {}: {e}", tok.text)))?;
    let crls = CertificateRevocationListDer::pem_slice_iter(&data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| diag::tls_error(&tok.range, "can't load CRL file", format!("{e:?}")))?;
    if crls.is_empty() {
        return Err(diag::error_at(&tok.range, format!("{}: no CRL found", tok.text)));
    }
    lb.tls.as_mut().expect("checked above").crls.extend(crls);
    Ok(Action::Ok)
}

fn https_nohttps11(lb: &mut ListenerBuilder, ctx: &mut Ctx) -> Result<Action> {
    let v = value::int_range(ctx, 0, 2)?;
    tls_state(lb).no_https11 = v;
    Ok(Action::Ok)
}

static HTTP_TABLE: &[Keyword<ListenerBuilder>] = &[
    Keyword { name: "End", handler: parse_end },
    Keyword { name: "Address", handler: lst_address },
    Keyword { name: "Port", handler: lst_port },
    Keyword { name: "SocketFrom", handler: lst_socket_from },
    Keyword { name: "xHTTP", handler: lst_xhttp },
    Keyword { name: "Client", handler: lst_client },
    Keyword { name: "CheckURL", handler: lst_check_url },
    Keyword { name: "Err404", handler: lst_err404 },
    Keyword { name: "Err413", handler: lst_err413 },
    Keyword { name: "Err414", handler: lst_err414 },
    Keyword { name: "Err500", handler: lst_err500 },
    Keyword { name: "Err501", handler: lst_err501 },
    Keyword { name: "Err503", handler: lst_err503 },
    Keyword { name: "MaxRequest", handler: lst_max_request },
    Keyword { name: "HeadRemove", handler: lst_head_remove },
    Keyword { name: "RewriteLocation", handler: lst_rewrite_location },
    Keyword { name: "RewriteDestination", handler: lst_rewrite_destination },
    Keyword { name: "LogLevel", handler: lst_log_level },
    Keyword { name: "AddHeader", handler: lst_add_header },
    Keyword { name: "Service", handler: lst_service },
    Keyword { name: "ACME", handler: lst_acme },
];

static HTTPS_TABLE: &[Keyword<ListenerBuilder>] = &[
    Keyword { name: "End", handler: parse_end },
    Keyword { name: "Address", handler: lst_address },
    Keyword { name: "Port", handler: lst_port },
    Keyword { name: "SocketFrom", handler: lst_socket_from },
    Keyword { name: "xHTTP", handler: lst_xhttp },
    Keyword { name: "Client", handler: lst_client },
    Keyword { name: "CheckURL", handler: lst_check_url },
    Keyword { name: "Err404", handler: lst_err404 },
    Keyword { name: "Err413", handler: lst_err413 },
    Keyword { name: "Err414", handler: lst_err414 },
    Keyword { name: "Err500", handler: lst_err500 },
    Keyword { name: "Err501", handler: lst_err501 },
    Keyword { name: "Err503", handler: lst_err503 },
    Keyword { name: "MaxRequest", handler: lst_max_request },
    Keyword { name: "HeadRemove", handler: lst_head_remove },
    Keyword { name: "RewriteLocation", handler: lst_rewrite_location },
    Keyword { name: "RewriteDestination", handler: lst_rewrite_destination },
    Keyword { name: "LogLevel", handler: lst_log_level },
    Keyword { name: "AddHeader", handler: lst_add_header },
    Keyword { name: "Service", handler: lst_service },
    Keyword { name: "Cert", handler: https_cert },
    Keyword { name: "ClientCert", handler: https_client_cert },
    Keyword { name: "Disable", handler: https_disable },
    Keyword { name: "Ciphers", handler: https_ciphers },
    Keyword { name: "SSLHonorCipherOrder", handler: https_honor_cipher_order },
    Keyword { name: "SSLAllowClientRenegotiation", handler: https_allow_client_renegotiation },
    Keyword { name: "CAlist", handler: https_calist },
    Keyword { name: "VerifyList", handler: https_verifylist },
    Keyword { name: "CRLlist", handler: https_crlist },
    Keyword { name: "NoHTTPS11", handler: https_nohttps11 },
];

pub fn parse_listen_http(head: &mut Vec<Listener>, ctx: &mut Ctx) -> Result<Action> {
    let mut lb = ListenerBuilder { lst: Listener::new(ctx.dfl), tls: None };
    let range = parser_loop(HTTP_TABLE, &mut lb, ctx, true)?.expect("section range");
    addr::check(&lb.lst.addr, &range, "ListenHTTP")?;
    head.push(lb.lst);
    Ok(Action::Ok)
}

pub fn parse_listen_https(head: &mut Vec<Listener>, ctx: &mut Ctx) -> Result<Action> {
    let mut lb = ListenerBuilder { lst: Listener::new(ctx.dfl), tls: Some(TlsState::default()) };
    let range = parser_loop(HTTPS_TABLE, &mut lb, ctx, true)?.expect("section range");
    addr::check(&lb.lst.addr, &range, "ListenHTTPS")?;

    let tls = lb.tls.take().expect("https parse state");
    if tls.contexts.is_empty() {
        return Err(diag::error_at(&range, "Cert statement is missing".into()));
    }

    let provider = params::provider_for_ciphers(tls.ciphers.as_deref());
    let verifier = client_verifier(
        tls.client_check,
        tls.roots,
        tls.crls,
        provider.clone(),
        &range,
    )?;
    let resolver = Arc::new(SniResolver::new(&tls.contexts));

    let builder = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(tls.disabled.versions())
        .map_err(|e| diag::tls_error(&range, "can't build TLS context", e))?;
    let server_config = match verifier {
        Some(v) => builder.with_client_cert_verifier(v),
        None => builder.with_no_client_auth(),
    }
    .with_cert_resolver(resolver);

    lb.lst.tls = Some(ListenerTls {
        contexts: tls.contexts,
        server_config: Arc::new(server_config),
        client_check: tls.client_check,
        verify_depth: tls.verify_depth,
        ciphers: tls.ciphers,
        disabled: tls.disabled,
        honor_cipher_order: tls.honor_cipher_order,
        allow_client_reneg: tls.allow_client_reneg,
        no_https11: tls.no_https11,
    });

    head.push(lb.lst);
    Ok(Action::Ok)
}
