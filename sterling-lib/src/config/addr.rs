//! Listener and backend address resolution.
//!
//! An address statement names a host (or IP address); a later port
//! statement completes INET/INET6 addresses. A name that does not
//! resolve is taken to be a UNIX-domain socket path.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use crate::config::parser::Ctx;
use crate::diag::{self, Range};
use crate::error::Result;
use crate::scan::{Token, TokenKind};

/// Longest UNIX-domain socket path the kernel accepts.
pub const UNIX_PATH_MAX: usize = 108;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockAddr {
    Inet(SocketAddr),
    Unix(PathBuf),
}

/// A partially assembled address: the address and the port arrive in
/// separate statements and each may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddrSpec {
    pub addr: Option<SockAddr>,
    pub has_port: bool,
}

impl AddrSpec {
    pub fn has_address(&self) -> bool {
        self.addr.is_some()
    }

    pub fn is_inet(&self) -> bool {
        matches!(self.addr, Some(SockAddr::Inet(_)))
    }

    pub fn unix_path(&self) -> Option<&std::path::Path> {
        match &self.addr {
            Some(SockAddr::Unix(p)) => Some(p),
            _ => None,
        }
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match &self.addr {
            Some(SockAddr::Inet(sa)) => Some(*sa),
            _ => None,
        }
    }
}

/// Resolve a host token into an address, falling back to a UNIX path
/// when resolution fails.
pub fn address_from_token(tok: &Token, ctx: &Ctx) -> Result<SockAddr> {
    if !matches!(tok.kind, TokenKind::Ident | TokenKind::Literal | TokenKind::String) {
        return Err(diag::error_at(
            &tok.range,
            format!("expected hostname or IP address, but found {}", tok.kind.name()),
        ));
    }

    if let Ok(ip) = tok.text.parse::<IpAddr>() {
        return Ok(SockAddr::Inet(SocketAddr::new(ip, 0)));
    }

    if ctx.features.dns {
        if let Ok(mut addrs) = (tok.text.as_str(), 0u16).to_socket_addrs() {
            if let Some(sa) = addrs.next() {
                return Ok(SockAddr::Inet(sa));
            }
        }
    }

    // not resolvable: assume a UNIX domain socket
    if tok.text.len() > UNIX_PATH_MAX {
        return Err(diag::error_at(&tok.range, "UNIX path name too long".into()));
    }
    Ok(SockAddr::Unix(PathBuf::from(&tok.text)))
}

pub fn assign_address(spec: &mut AddrSpec, ctx: &mut Ctx) -> Result<()> {
    if spec.has_address() {
        return Err(diag::error_at(ctx.scan.last_range(), "Duplicate Address statement".into()));
    }
    let tok = ctx.scan.any()?;
    spec.addr = Some(address_from_token(&tok, ctx)?);
    Ok(())
}

/// Write a port into an already resolved INET/INET6 address.
pub fn port_from_token(spec: &mut AddrSpec, tok: &Token) -> Result<()> {
    if !matches!(tok.kind, TokenKind::Ident | TokenKind::Number) {
        return Err(diag::error_at(
            &tok.range,
            format!("expected port number or service name, but found {}", tok.kind.name()),
        ));
    }

    let Some(SockAddr::Inet(sa)) = &mut spec.addr else {
        return Err(diag::error_at(
            &tok.range,
            "Port is not applicable to this address family".into(),
        ));
    };

    let port = tok
        .text
        .parse::<u16>()
        .map_err(|_| diag::error_at(&tok.range, format!("bad port number: {}", tok.text)))?;
    sa.set_port(port);
    spec.has_port = true;
    Ok(())
}

pub fn assign_port(spec: &mut AddrSpec, ctx: &mut Ctx) -> Result<()> {
    if spec.has_port {
        return Err(diag::error_at(ctx.scan.last_range(), "Duplicate port statement".into()));
    }
    if !spec.has_address() {
        return Err(diag::error_at(
            ctx.scan.last_range(),
            "Address statement should precede Port".into(),
        ));
    }
    let tok = ctx.scan.any()?;
    port_from_token(spec, &tok)
}

/// Validate a finished address block: an address must be present, and
/// INET/INET6 addresses need a port.
pub fn check(spec: &AddrSpec, range: &Range, name: &str) -> Result<()> {
    if !spec.has_address() {
        return Err(diag::error_at(range, format!("{name} missing Address declaration")));
    }
    if spec.is_inet() && !spec.has_port {
        return Err(diag::error_at(range, format!("{name} missing Port declaration")));
    }
    Ok(())
}
