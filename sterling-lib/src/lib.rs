#![forbid(unsafe_code)]

//! Sterling: an HTTP/HTTPS reverse proxy and load balancer.
//!
//! This crate holds the configuration front-end: the scanner and
//! section parser for the declarative config language, the semantic
//! builders that produce listeners, services and backends, and the
//! TLS context assembly (certificates, SNI dispatch, client
//! verification) the proxy engine runs on.

pub mod config;
pub mod diag;
pub mod error;
pub mod features;
pub mod scan;
pub mod tls;

pub use config::{load_from_path, Backend, BackendKind, Config, Listener, Service, SessionType};
pub use error::{ConfigError, Result};
pub use features::Features;
