//! Backend-side TLS: the client configuration used when a backend
//! block declares `HTTPS`.
//!
//! The proxy connects to its own upstreams, so the server certificate
//! is not verified, matching the original behavior. A `Cert`
//! statement adds a client certificate for upstreams that demand one.

use std::sync::Arc;

use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, Error as TlsLibError, SignatureScheme};

use super::params::{provider_for_ciphers, ProtoSet};
use crate::diag::{self, Range};
use crate::error::Result;

/// TLS statements accumulated while parsing a backend block; the
/// config is assembled when the block ends.
#[derive(Debug, Default)]
pub struct ClientTlsBuilder {
    pub cert: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    pub ciphers: Option<String>,
    pub disabled: ProtoSet,
}

/// The assembled backend TLS context.
#[derive(Debug)]
pub struct BackendTls {
    pub config: Arc<ClientConfig>,
    pub ciphers: Option<String>,
    pub disabled: ProtoSet,
    pub has_client_cert: bool,
}

pub fn build_backend_tls(builder: ClientTlsBuilder, range: &Range) -> Result<BackendTls> {
    let provider = provider_for_ciphers(builder.ciphers.as_deref());
    let verifier = Arc::new(NoServerVerify::new(&provider));

    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(builder.disabled.versions())
        .map_err(|e| diag::tls_error(range, "can't build backend TLS context", e))?
        .dangerous()
        .with_custom_certificate_verifier(verifier);

    let has_client_cert = builder.cert.is_some();
    let config = match builder.cert {
        Some((chain, key)) => config
            .with_client_auth_cert(chain, key)
            .map_err(|e| diag::tls_error(range, "check_private_key failed", e))?,
        None => config.with_no_client_auth(),
    };

    Ok(BackendTls {
        config: Arc::new(config),
        ciphers: builder.ciphers,
        disabled: builder.disabled,
        has_client_cert,
    })
}

/// Accepts any upstream certificate; the backend connection is
/// encrypted but not authenticated.
#[derive(Debug)]
struct NoServerVerify {
    supported: tokio_rustls::rustls::crypto::WebPkiSupportedAlgorithms,
}

impl NoServerVerify {
    fn new(provider: &CryptoProvider) -> NoServerVerify {
        NoServerVerify { supported: provider.signature_verification_algorithms }
    }
}

impl ServerCertVerifier for NoServerVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsLibError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsLibError> {
        verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsLibError> {
        verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}
