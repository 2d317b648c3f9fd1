//! Internationalized domain name helpers.
//!
//! Only domains that actually contain non-ASCII characters are run through
//! IDNA; plain ASCII domains are returned untouched so their case survives
//! and exact-match comparisons against stored identities keep working.

use tracing::debug;

/// Convert `domain` to its ASCII-compatible encoding.
///
/// Returns `None` when the domain contains non-ASCII characters that IDNA
/// rejects.
pub fn domain_to_ascii(domain: &str) -> Option<String> {
    if is_printable_ascii(domain) {
        return Some(domain.to_string());
    }
    match idna::domain_to_ascii(domain) {
        Ok(ascii) => Some(ascii),
        Err(e) => {
            debug!(domain, error = ?e, "IDNA conversion failed");
            None
        }
    }
}

/// IDN-normalize an email address: the local part is kept verbatim, the part
/// after the first `@` is converted with [`domain_to_ascii`].
pub fn email_to_ascii(address: &str) -> Option<String> {
    match address.split_once('@') {
        Some((local, domain)) => {
            domain_to_ascii(domain).map(|domain| format!("{}@{}", local, domain))
        }
        None => domain_to_ascii(address),
    }
}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7e).contains(&b))
}
