//! Persisted identity records and the store interface the orchestrator
//! writes through.

use serde::{Deserialize, Serialize};

use crate::errors::DatabaseError;

/// A stored identity linking one address to a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub identity_id: i64,
    pub user_id: i64,
    pub email: String,
    /// Display name.
    pub name: String,
    /// Whether this is the user's primary ("standard") identity.
    pub standard: bool,
}

/// An identity that should be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdentity {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub standard: bool,
}

/// Persistence for identity records.
///
/// Implementations are expected to make `insert_identity` idempotent for a
/// `(user_id, email)` pair, since concurrent logins of the same account may
/// both decide to create the same address.
pub trait IdentityStore {
    /// All identities of `user_id`.
    fn list_emails(&self, user_id: i64) -> Result<Vec<Identity>, DatabaseError>;

    /// Persist `identity` and return its id.
    fn insert_identity(&self, identity: &NewIdentity) -> Result<i64, DatabaseError>;

    /// Remove the identity with `identity_id`.
    fn delete_identity(&self, identity_id: i64) -> Result<(), DatabaseError>;
}

impl<S: IdentityStore + ?Sized> IdentityStore for &S {
    fn list_emails(&self, user_id: i64) -> Result<Vec<Identity>, DatabaseError> {
        (**self).list_emails(user_id)
    }

    fn insert_identity(&self, identity: &NewIdentity) -> Result<i64, DatabaseError> {
        (**self).insert_identity(identity)
    }

    fn delete_identity(&self, identity_id: i64) -> Result<(), DatabaseError> {
        (**self).delete_identity(identity_id)
    }
}
