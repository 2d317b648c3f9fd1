//! [`IdentityStore`] implementation on the `identities` table.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::identity::{Identity, IdentityStore, NewIdentity};

fn row_to_identity(row: &Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        identity_id: row.get(0)?,
        user_id: row.get(1)?,
        email: row.get(2)?,
        name: row.get(3)?,
        standard: row.get::<_, i64>(4)? != 0,
    })
}

impl IdentityStore for Database {
    /// Identities of `user_id`, standard first, then in creation order.
    fn list_emails(&self, user_id: i64) -> Result<Vec<Identity>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT identity_id, user_id, email, name, standard
             FROM identities WHERE user_id = ?1
             ORDER BY standard DESC, identity_id ASC",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_identity)?;
        let mut identities = Vec::new();
        for row in rows {
            identities.push(row?);
        }
        Ok(identities)
    }

    /// Insert an identity. An existing `(user_id, email)` row is left
    /// untouched and its id returned.
    fn insert_identity(&self, identity: &NewIdentity) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT INTO identities (user_id, email, name, standard, created_at, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (user_id, email) DO NOTHING",
            params![
                identity.user_id,
                identity.email,
                identity.name,
                identity.standard as i64,
                now
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT identity_id FROM identities WHERE user_id = ?1 AND email = ?2",
            params![identity.user_id, identity.email],
            |row| row.get(0),
        )?;
        debug!(
            id,
            user_id = identity.user_id,
            email = %identity.email,
            already_present = inserted == 0,
            "inserted identity"
        );
        Ok(id)
    }

    fn delete_identity(&self, identity_id: i64) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let deleted = conn.execute(
            "DELETE FROM identities WHERE identity_id = ?1",
            params![identity_id],
        )?;
        if deleted == 0 {
            return Err(DatabaseError::NotFound {
                entity: "identity".into(),
                id: identity_id.to_string(),
            });
        }
        debug!(identity_id, "deleted identity");
        Ok(())
    }
}

impl Database {
    /// Look up a single identity by id.
    pub fn get_identity(&self, identity_id: i64) -> Result<Option<Identity>, DatabaseError> {
        let conn = self.conn();
        let identity = conn
            .query_row(
                "SELECT identity_id, user_id, email, name, standard
                 FROM identities WHERE identity_id = ?1",
                params![identity_id],
                row_to_identity,
            )
            .optional()?;
        Ok(identity)
    }

    /// Number of identities stored for `user_id`.
    pub fn count_identities(&self, user_id: i64) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM identities WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
