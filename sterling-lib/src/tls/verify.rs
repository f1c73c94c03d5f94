//! Client-certificate verification for HTTPS listeners.
//!
//! `ClientCert` modes:
//!   0 — never ask for a certificate;
//!   1 — ask, verify when presented, proceed without one;
//!   2 — ask and fail the handshake without a valid certificate;
//!   3 — ask but accept whatever arrives unverified.

use std::sync::Arc;

use rustls_pki_types::{CertificateDer, CertificateRevocationListDer, UnixTime};
use tokio_rustls::rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use tokio_rustls::rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{
    DigitallySignedStruct, DistinguishedName, Error as TlsLibError, RootCertStore, SignatureScheme,
};

use crate::diag::{self, Range};
use crate::error::Result;

/// Build the verifier for a listener, or `None` when client
/// certificates are not requested at all.
pub fn client_verifier(
    mode: i32,
    roots: RootCertStore,
    crls: Vec<CertificateRevocationListDer<'static>>,
    provider: Arc<CryptoProvider>,
    range: &Range,
) -> Result<Option<Arc<dyn ClientCertVerifier>>> {
    match mode {
        0 => Ok(None),
        3 => Ok(Some(Arc::new(AcceptAnyClientCert::new(&provider)))),
        1 | 2 => {
            if roots.is_empty() {
                return Err(diag::error_at(
                    range,
                    "ClientCert verification requires a CAlist or VerifyList".into(),
                ));
            }
            let builder = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .with_crls(crls);
            let builder = if mode == 1 { builder.allow_unauthenticated() } else { builder };
            let verifier = builder
                .build()
                .map_err(|e| diag::tls_error(range, "can't build client verifier", e))?;
            Ok(Some(verifier))
        }
        _ => unreachable!("mode is range-checked at parse time"),
    }
}

/// Requests a client certificate and accepts any, signature checks
/// aside. Mirrors the "ask but do not verify" mode of the original
/// proxy.
#[derive(Debug)]
pub struct AcceptAnyClientCert {
    supported: tokio_rustls::rustls::crypto::WebPkiSupportedAlgorithms,
}

impl AcceptAnyClientCert {
    pub fn new(provider: &CryptoProvider) -> AcceptAnyClientCert {
        AcceptAnyClientCert { supported: provider.signature_verification_algorithms }
    }
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, TlsLibError> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<tokio_rustls::rustls::client::danger::HandshakeSignatureValid, TlsLibError>
    {
        verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<tokio_rustls::rustls::client::danger::HandshakeSignatureValid, TlsLibError>
    {
        verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }
}
