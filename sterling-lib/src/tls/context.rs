//! Per-certificate TLS context: a certificate chain and private key
//! loaded from one PEM file, plus the subject CN and subjectAltName
//! DNS entries used for SNI dispatch.

use std::sync::Arc;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::crypto::CryptoProvider;
use tokio_rustls::rustls::sign::CertifiedKey;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use crate::diag::{self, Range};
use crate::error::Result;

/// One server certificate with the names it answers for.
#[derive(Debug)]
pub struct CertContext {
    pub certified: Arc<CertifiedKey>,
    /// Subject common name.
    pub server_name: String,
    /// DNS entries from the subjectAltName extension.
    pub subject_alt_names: Vec<String>,
}

/// Load a PEM file containing a certificate chain followed by its
/// private key.
pub fn load_chain_and_key(
    path: &str,
    range: &Range,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let data = std::fs::read(path)
        .map_err(|e| diag::error_at(range, format!("can't open {path}: {e}")))?;

    let certs = CertificateDer::pem_slice_iter(&data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| diag::tls_error(range, "can't load certificate chain", format!("{e:?}")))?;
    if certs.is_empty() {
        return Err(diag::error_at(range, format!("{path}: no certificate found")));
    }

    let mut keys = PrivateKeyDer::pem_slice_iter(&data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| diag::tls_error(range, "can't load private key", format!("{e:?}")))?;
    let Some(key) = keys.pop() else {
        return Err(diag::error_at(range, format!("{path}: no private key found")));
    };

    Ok((certs, key))
}

/// Extract the subject CN and the subjectAltName DNS entries from the
/// leaf certificate.
pub fn cert_names(der: &CertificateDer<'_>, range: &Range) -> Result<(String, Vec<String>)> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| diag::tls_error(range, "could not get certificate subject", e))?;

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
        .filter(|cn| !cn.is_empty())
        .ok_or_else(|| {
            diag::error_at(
                range,
                format!("no CN in certificate subject name ({})", cert.subject()),
            )
        })?;

    let alt_names = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|gn| match gn {
                GeneralName::DNSName(name) => Some((*name).to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok((cn, alt_names))
}

impl CertContext {
    /// Assemble a context from a PEM file: chain + key + SNI names.
    pub fn load(path: &str, provider: &CryptoProvider, range: &Range) -> Result<CertContext> {
        let (certs, key) = load_chain_and_key(path, range)?;
        let (server_name, subject_alt_names) = cert_names(&certs[0], range)?;
        let signer = provider
            .key_provider
            .load_private_key(key)
            .map_err(|e| diag::tls_error(range, "check_private_key failed", e))?;
        Ok(CertContext {
            certified: Arc::new(CertifiedKey::new(certs, signer)),
            server_name,
            subject_alt_names,
        })
    }
}
