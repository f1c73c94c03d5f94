//! The configuration front-end: compiles the declarative config file
//! into the runtime tree of listeners, services and backends consumed
//! by the proxy engine.

pub mod addr;
pub mod backend;
pub mod listener;
pub mod parser;
pub mod service;
pub mod value;

use std::path::Path;

use crate::diag;
use crate::error::{ConfigError, Result};
use crate::features::Features;
use crate::scan::Scanner;

pub use addr::{AddrSpec, SockAddr, UNIX_PATH_MAX};
pub use backend::{Backend, BackendKind};
pub use listener::{Listener, ListenerTls, XHTTP};
pub use service::{Service, SessionType, SERVICE_NAME_MAX};
pub use value::{Facility, Matcher};

use parser::{parser_loop, Action, Ctx, Keyword};

/// Tunable defaults inherited by the sections that follow them in the
/// file.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub facility: Facility,
    pub log_level: i32,
    /// Client idle timeout, seconds.
    pub clnt_to: u32,
    /// Backend response timeout, seconds.
    pub be_to: u32,
    /// WebSocket idle timeout, seconds.
    pub ws_to: u32,
    /// Backend connect timeout, seconds.
    pub be_connto: u32,
    pub ignore_case: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            facility: Facility::Daemon,
            log_level: 1,
            clnt_to: 10,
            be_to: 15,
            ws_to: 600,
            be_connto: 15,
            ignore_case: false,
        }
    }
}

/// The complete parsed configuration.
#[derive(Debug)]
pub struct Config {
    pub user: Option<String>,
    pub group: Option<String>,
    pub root_jail: Option<String>,
    pub daemonize: bool,
    pub supervisor: bool,
    pub threads: u32,
    /// Seconds to let running connections finish on shutdown.
    pub grace: u32,
    /// Backend liveness probe interval, seconds.
    pub alive_to: u32,
    pub facility: Facility,
    pub log_level: i32,
    pub anonymise: bool,
    pub control_socket: Option<String>,
    /// Services defined outside any listener, consulted when no
    /// listener-local service matches.
    pub services: Vec<Service>,
    pub listeners: Vec<Listener>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            user: None,
            group: None,
            root_jail: None,
            daemonize: true,
            supervisor: true,
            threads: 128,
            grace: 30,
            alive_to: 30,
            facility: Facility::Daemon,
            log_level: 1,
            anonymise: false,
            control_socket: None,
            services: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

impl Config {
    /// Final validation: a proxy without listeners cannot serve.
    pub fn require_listeners(&self) -> Result<()> {
        if self.listeners.is_empty() {
            return Err(ConfigError::NoListeners);
        }
        Ok(())
    }
}

fn top_include(_cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    let tok = ctx.scan.expect(crate::scan::TokenMask::STRING)?;
    ctx.scan.include(&tok.text)?;
    Ok(Action::OkNoNewline)
}

fn top_user(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    cfg.user = Some(value::string(ctx)?);
    Ok(Action::Ok)
}

fn top_group(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    cfg.group = Some(value::string(ctx)?);
    Ok(Action::Ok)
}

fn top_root_jail(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    cfg.root_jail = Some(value::string(ctx)?);
    Ok(Action::Ok)
}

fn top_daemon(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    cfg.daemonize = value::bool_value(ctx)?;
    Ok(Action::Ok)
}

fn top_supervisor(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    cfg.supervisor = value::bool_value(ctx)?;
    Ok(Action::Ok)
}

fn top_threads(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    cfg.threads = value::unsigned(ctx)?;
    Ok(Action::Ok)
}

fn top_grace(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    cfg.grace = value::timeout(ctx)?;
    Ok(Action::Ok)
}

fn top_log_facility(_cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    ctx.dfl.facility = value::log_facility(ctx)?;
    Ok(Action::Ok)
}

fn top_log_level(_cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    ctx.dfl.log_level = value::log_level(ctx)?;
    Ok(Action::Ok)
}

fn top_alive(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    cfg.alive_to = value::timeout(ctx)?;
    Ok(Action::Ok)
}

fn top_client(_cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    ctx.dfl.clnt_to = value::timeout(ctx)?;
    Ok(Action::Ok)
}

fn top_timeout(_cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    ctx.dfl.be_to = value::timeout(ctx)?;
    Ok(Action::Ok)
}

fn top_ws_timeout(_cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    ctx.dfl.ws_to = value::timeout(ctx)?;
    Ok(Action::Ok)
}

fn top_conn_to(_cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    ctx.dfl.be_connto = value::timeout(ctx)?;
    Ok(Action::Ok)
}

fn top_ignore_case(_cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    ctx.dfl.ignore_case = value::bool_value(ctx)?;
    Ok(Action::Ok)
}

/// Accepted for compatibility; the TLS library picks its own curves.
fn top_ecdh_curve(_cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    let _ = value::string(ctx)?;
    diag::report_at(ctx.scan.last_range(), "statement ignored");
    Ok(Action::Ok)
}

/// Accepted for compatibility; hardware engines are an OpenSSL
/// concept.
fn top_ssl_engine(_cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    let _ = value::string(ctx)?;
    diag::report_at(ctx.scan.last_range(), "statement ignored");
    Ok(Action::Ok)
}

fn top_control(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    cfg.control_socket = Some(value::string(ctx)?);
    Ok(Action::Ok)
}

fn top_anonymise(cfg: &mut Config, _ctx: &mut Ctx) -> Result<Action> {
    cfg.anonymise = true;
    Ok(Action::Ok)
}

fn top_service(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    service::parse_service_into(&mut cfg.services, ctx)
}

fn top_listen_http(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    listener::parse_listen_http(&mut cfg.listeners, ctx)
}

fn top_listen_https(cfg: &mut Config, ctx: &mut Ctx) -> Result<Action> {
    listener::parse_listen_https(&mut cfg.listeners, ctx)
}

static TOP_TABLE: &[Keyword<Config>] = &[
    Keyword { name: "Include", handler: top_include },
    Keyword { name: "User", handler: top_user },
    Keyword { name: "Group", handler: top_group },
    Keyword { name: "RootJail", handler: top_root_jail },
    Keyword { name: "Daemon", handler: top_daemon },
    Keyword { name: "Supervisor", handler: top_supervisor },
    Keyword { name: "Threads", handler: top_threads },
    Keyword { name: "Grace", handler: top_grace },
    Keyword { name: "LogFacility", handler: top_log_facility },
    Keyword { name: "LogLevel", handler: top_log_level },
    Keyword { name: "Alive", handler: top_alive },
    Keyword { name: "Client", handler: top_client },
    Keyword { name: "TimeOut", handler: top_timeout },
    Keyword { name: "WSTimeOut", handler: top_ws_timeout },
    Keyword { name: "ConnTO", handler: top_conn_to },
    Keyword { name: "IgnoreCase", handler: top_ignore_case },
    Keyword { name: "ECDHCurve", handler: top_ecdh_curve },
    Keyword { name: "SSLEngine", handler: top_ssl_engine },
    Keyword { name: "Control", handler: top_control },
    Keyword { name: "Anonymise", handler: top_anonymise },
    Keyword { name: "Anonymize", handler: top_anonymise },
    Keyword { name: "Service", handler: top_service },
    Keyword { name: "ListenHTTP", handler: top_listen_http },
    Keyword { name: "ListenHTTPS", handler: top_listen_https },
];

/// Parse a configuration file into the runtime tree.
pub fn load_from_path<P: AsRef<Path>>(path: P, features: &Features) -> Result<Config> {
    let path = path.as_ref().to_string_lossy();
    let mut scanner = Scanner::open(&path)?;
    let mut dfl = Defaults::default();
    let mut cfg = Config::default();

    {
        let mut ctx = Ctx { scan: &mut scanner, dfl: &mut dfl, features };
        parser_loop(TOP_TABLE, &mut cfg, &mut ctx, false)?;
    }

    if !scanner.is_finished() {
        return Err(diag::error_nolocus("input stack inconsistent after parse".into()));
    }

    cfg.facility = dfl.facility;
    cfg.log_level = dfl.log_level;
    Ok(cfg)
}
