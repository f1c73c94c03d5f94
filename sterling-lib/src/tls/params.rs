//! Cipher and protocol parameters shared by listener and backend TLS
//! contexts.

use std::sync::Arc;

use tokio_rustls::rustls::crypto::{aws_lc_rs, CryptoProvider};
use tokio_rustls::rustls::{version, SupportedProtocolVersion};

use crate::config::parser::Ctx;
use crate::diag;
use crate::error::Result;
use crate::scan::TokenMask;

/// Cipher suite names understood in a `Ciphers` list.
pub fn supported_cipher_suites() -> Vec<String> {
    aws_lc_rs::default_provider()
        .cipher_suites
        .iter()
        .map(|s| format!("{:?}", s.suite()))
        .collect()
}

pub fn is_cipher_suite_supported(name: &str) -> bool {
    supported_cipher_suites().iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Accumulated set of disabled protocols. Disabling a protocol also
/// disables everything older, so each keyword maps to a
/// downward-inclusive mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtoSet(u8);

impl ProtoSet {
    pub const SSLV2: ProtoSet = ProtoSet(0b00001);
    pub const SSLV3: ProtoSet = ProtoSet(0b00011);
    pub const TLSV1: ProtoSet = ProtoSet(0b00111);
    pub const TLSV1_1: ProtoSet = ProtoSet(0b01111);
    pub const TLSV1_2: ProtoSet = ProtoSet(0b11111);

    pub fn from_keyword(name: &str) -> Option<ProtoSet> {
        // protocol names are matched exactly
        match name {
            "SSLv2" => Some(Self::SSLV2),
            "SSLv3" => Some(Self::SSLV3),
            "TLSv1" => Some(Self::TLSV1),
            "TLSv1_1" => Some(Self::TLSV1_1),
            "TLSv1_2" => Some(Self::TLSV1_2),
            _ => None,
        }
    }

    pub fn disable(&mut self, other: ProtoSet) {
        self.0 |= other.0;
    }

    pub fn contains(self, other: ProtoSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// Protocol versions left enabled. The library never offers
    /// anything older than TLS 1.2, so only the TLSv1_2 bit matters.
    pub fn versions(self) -> &'static [&'static SupportedProtocolVersion] {
        static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&version::TLS13];
        static TLS12_AND_TLS13: &[&SupportedProtocolVersion] = &[&version::TLS12, &version::TLS13];
        if self.contains(Self::TLSV1_2) {
            TLS13_ONLY
        } else {
            TLS12_AND_TLS13
        }
    }
}

/// Parse one protocol name after `Disable` and fold it into `set`.
pub fn parse_proto_disable(set: &mut ProtoSet, ctx: &mut Ctx) -> Result<()> {
    let tok = ctx.scan.expect(TokenMask::IDENT)?;
    let Some(mask) = ProtoSet::from_keyword(&tok.text) else {
        return Err(diag::error_at(&tok.range, "unrecognized protocol name".into()));
    };
    set.disable(mask);
    Ok(())
}

/// Build a crypto provider whose suite list honours a `Ciphers`
/// statement. Names that match nothing leave the defaults in place,
/// so legacy OpenSSL-syntax cipher strings still load.
pub fn provider_for_ciphers(ciphers: Option<&str>) -> Arc<CryptoProvider> {
    let mut provider = aws_lc_rs::default_provider();
    if let Some(list) = ciphers {
        let wanted: Vec<&str> = list.split(':').filter(|s| !s.is_empty()).collect();
        let filtered: Vec<_> = provider
            .cipher_suites
            .iter()
            .copied()
            .filter(|s| {
                let name = format!("{:?}", s.suite());
                wanted.iter().any(|w| w.eq_ignore_ascii_case(&name))
            })
            .collect();
        if !filtered.is_empty() {
            provider.cipher_suites = filtered;
        }
    }
    Arc::new(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_is_downward_cumulative() {
        let mut set = ProtoSet::default();
        set.disable(ProtoSet::TLSV1_1);
        assert!(set.contains(ProtoSet::SSLV2));
        assert!(set.contains(ProtoSet::SSLV3));
        assert!(set.contains(ProtoSet::TLSV1));
        assert!(set.contains(ProtoSet::TLSV1_1));
        assert!(!set.contains(ProtoSet::TLSV1_2));
        assert_eq!(set.versions().len(), 2);
    }

    #[test]
    fn disabling_tls12_leaves_only_tls13() {
        let mut set = ProtoSet::default();
        set.disable(ProtoSet::TLSV1_2);
        assert_eq!(set.versions(), &[&version::TLS13]);
    }

    #[test]
    fn protocol_names_are_case_sensitive() {
        assert!(ProtoSet::from_keyword("TLSv1_1").is_some());
        assert!(ProtoSet::from_keyword("tlsv1_1").is_none());
    }

    #[test]
    fn cipher_filter_matches_names() {
        let p = provider_for_ciphers(Some("TLS13_AES_128_GCM_SHA256"));
        assert_eq!(p.cipher_suites.len(), 1);
    }

    #[test]
    fn unmatched_cipher_list_keeps_defaults() {
        let dfl = aws_lc_rs::default_provider().cipher_suites.len();
        let p = provider_for_ciphers(Some("HIGH:!aNULL"));
        assert_eq!(p.cipher_suites.len(), dfl);
    }
}
