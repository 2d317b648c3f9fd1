//! Turns one raw [`DirectoryRecord`] into a canonical [`DirectoryIdentity`].
//!
//! The canonical email list is what a user's stored identities are
//! reconciled against:
//!
//! 1. the record's own `email` value (first element), if it is an address;
//! 2. every value of every `email*` / `aliases*` field, in field order;
//!
//! IDN-normalized and deduplicated by exact string match, first occurrence
//! wins.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;

use super::idn;
use crate::directory::DirectoryRecord;

/// Field names that carry addresses: `email`, `aliases`, or either with a
/// `:qualifier` suffix such as `email:work`.
static ADDRESS_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(email|aliases)($|:)").expect("ADDRESS_FIELD is a valid regex pattern")
});

/// Canonical view of one directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryIdentity {
    /// `firstname + " " + surname`.
    pub display_name: String,
    /// The record's own address, if it had a usable one.
    pub primary_email: Option<String>,
    /// Unique, normalized, primary first.
    pub email_list: Vec<String>,
}

impl DirectoryIdentity {
    /// Whether `email` is the primary ("standard") address.
    pub fn is_primary(&self, email: &str) -> bool {
        self.primary_email.as_deref() == Some(email)
    }

    /// Nothing to reconcile against.
    pub fn is_empty(&self) -> bool {
        self.email_list.is_empty()
    }
}

/// Whether a record field holds email addresses.
pub fn is_address_field(name: &str) -> bool {
    ADDRESS_FIELD.is_match(name)
}

/// Whether `value` looks like an address: an `@` with something before it.
fn has_address_marker(value: &str) -> bool {
    matches!(value.find('@'), Some(pos) if pos > 0)
}

fn accept(value: &str) -> Option<String> {
    if has_address_marker(value) {
        idn::email_to_ascii(value)
    } else {
        None
    }
}

/// Build the canonical identity for `record`. Pure and deterministic.
pub fn parse(record: &DirectoryRecord) -> DirectoryIdentity {
    let firstname = record.first("firstname").unwrap_or("");
    let surname = record.first("surname").unwrap_or("");
    let display_name = format!("{} {}", firstname, surname);

    let primary_email = record.first("email").and_then(accept);

    let mut email_list: Vec<String> = primary_email.iter().cloned().collect();
    let aliases = record
        .fields()
        .filter(|(name, _)| is_address_field(name))
        .flat_map(|(_, value)| value.values())
        .filter_map(|value| accept(value));
    for address in aliases {
        if !email_list.contains(&address) {
            email_list.push(address);
        }
    }

    DirectoryIdentity {
        display_name,
        primary_email,
        email_list,
    }
}
