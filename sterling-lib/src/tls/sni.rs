//! SNI certificate selection.
//!
//! The ClientHello server name is matched against each certificate's
//! CN first, then its subjectAltName entries, in configuration order.
//! Matching uses shell-glob semantics (`*`, `?`, `[…]` classes) and
//! folds case, so wildcard certificates behave as issued. When
//! nothing matches, or the client sent no name, the first certificate
//! answers.

use std::sync::Arc;

use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::CertifiedKey;

use super::context::CertContext;

#[derive(Debug)]
struct SniEntry {
    certified: Arc<CertifiedKey>,
    server_name: String,
    subject_alt_names: Vec<String>,
}

#[derive(Debug)]
pub struct SniResolver {
    entries: Vec<SniEntry>,
}

impl SniResolver {
    pub fn new(contexts: &[CertContext]) -> SniResolver {
        SniResolver {
            entries: contexts
                .iter()
                .map(|pc| SniEntry {
                    certified: pc.certified.clone(),
                    server_name: pc.server_name.clone(),
                    subject_alt_names: pc.subject_alt_names.clone(),
                })
                .collect(),
        }
    }

    /// Pick the certificate answering for `name`; no name, or no
    /// match, selects the first certificate.
    pub fn resolve_name(&self, name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        if let Some(name) = name {
            for entry in &self.entries {
                if hostname_match(&entry.server_name, name)
                    || entry.subject_alt_names.iter().any(|san| hostname_match(san, name))
                {
                    return Some(entry.certified.clone());
                }
            }
        }
        self.entries.first().map(|e| e.certified.clone())
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.resolve_name(client_hello.server_name())
    }
}

/// Shell-glob match of `name` against `pattern`, ASCII case folded.
/// `*` matches any run, `?` any single character, `[…]` a class with
/// ranges; `!` or `^` first negates the class.
pub fn hostname_match(pattern: &str, name: &str) -> bool {
    glob_match(pattern.as_bytes(), name.as_bytes())
}

fn glob_match(pat: &[u8], name: &[u8]) -> bool {
    let (mut p, mut n) = (0, 0);
    // restart points for the most recent '*'
    let (mut star_p, mut star_n) = (usize::MAX, 0);

    while n < name.len() {
        if p < pat.len() {
            match pat[p] {
                b'*' => {
                    star_p = p;
                    star_n = n;
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    n += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = class_match(&pat[p..], name[n]) {
                        if matched {
                            p += next;
                            n += 1;
                            continue;
                        }
                    }
                }
                c => {
                    if c.eq_ignore_ascii_case(&name[n]) {
                        p += 1;
                        n += 1;
                        continue;
                    }
                }
            }
        }
        // mismatch: widen the last '*' if there was one
        if star_p != usize::MAX {
            p = star_p + 1;
            star_n += 1;
            n = star_n;
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == b'*' {
        p += 1;
    }
    p == pat.len()
}

/// Match `c` against a `[…]` class starting at `pat[0] == b'['`.
/// Returns the match result and the pattern length consumed, or None
/// when the class is unterminated.
fn class_match(pat: &[u8], c: u8) -> Option<(bool, usize)> {
    let mut i = 1;
    let negated = matches!(pat.get(i), Some(b'!') | Some(b'^'));
    if negated {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    loop {
        let &ch = pat.get(i)?;
        if ch == b']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;
        if pat.get(i + 1) == Some(&b'-') && pat.get(i + 2).is_some_and(|&e| e != b']') {
            let lo = ch.to_ascii_lowercase();
            let hi = pat[i + 2].to_ascii_lowercase();
            let cc = c.to_ascii_lowercase();
            if lo <= cc && cc <= hi {
                matched = true;
            }
            i += 3;
        } else {
            if ch.eq_ignore_ascii_case(&c) {
                matched = true;
            }
            i += 1;
        }
    }
}
