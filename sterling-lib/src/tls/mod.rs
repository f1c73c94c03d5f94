pub mod client;
pub mod context;
pub mod params;
pub mod sni;
pub mod verify;

pub use client::{build_backend_tls, BackendTls, ClientTlsBuilder};
pub use context::CertContext;
pub use params::{is_cipher_suite_supported, supported_cipher_suites, ProtoSet};
pub use sni::{hostname_match, SniResolver};
pub use verify::client_verifier;
