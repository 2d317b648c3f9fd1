//! Create/delete planning between stored identities and a canonical
//! directory identity.

use serde::Serialize;

use super::parser::DirectoryIdentity;
use super::store::{Identity, NewIdentity};

/// An identity to create, before it is bound to a user and passed through
/// the creation hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewIdentitySpec {
    pub email: String,
    pub name: String,
    pub standard: bool,
}

impl NewIdentitySpec {
    pub fn for_user(&self, user_id: i64) -> NewIdentity {
        NewIdentity {
            user_id,
            email: self.email.clone(),
            name: self.name.clone(),
            standard: self.standard,
        }
    }
}

/// Operations that bring the stored identities in line with the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityDiff {
    /// In canonical email-list order.
    pub to_create: Vec<NewIdentitySpec>,
    /// In stored order.
    pub to_delete: Vec<Identity>,
}

impl IdentityDiff {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the diff between `current` and `canonical`.
///
/// Matching is exact and case-sensitive. Each canonical address keeps at
/// most one stored identity, the first one carrying it; any further
/// identity with the same address is scheduled for deletion.
///
/// Callers must not pass an empty canonical list: that would schedule every
/// stored identity for deletion.
pub fn diff(current: &[Identity], canonical: &DirectoryIdentity) -> IdentityDiff {
    let mut kept = vec![false; current.len()];
    let mut to_create = Vec::new();

    for email in &canonical.email_list {
        match current.iter().position(|identity| identity.email == *email) {
            Some(index) => kept[index] = true,
            None => to_create.push(NewIdentitySpec {
                email: email.clone(),
                name: canonical.display_name.clone(),
                standard: canonical.is_primary(email),
            }),
        }
    }

    let to_delete = current
        .iter()
        .zip(kept)
        .filter(|(_, kept)| !kept)
        .map(|(identity, _)| identity.clone())
        .collect();

    IdentityDiff {
        to_create,
        to_delete,
    }
}
