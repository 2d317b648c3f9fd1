//! Directory lookup interfaces and backends.
//!
//! The orchestrator only depends on [`DirectoryConnector`] and
//! [`DirectoryLookup`]. [`ldap`] provides the production backend and
//! [`search_fields`] the wrapper that pins the "all fields" search target.

pub mod ldap;
pub mod record;
pub mod search_fields;

use async_trait::async_trait;

use crate::errors::DirectoryError;

pub use ldap::{LdapConnector, LdapDirectory};
pub use record::{DirectoryRecord, FieldValue};
pub use search_fields::SearchFieldsOverride;

/// Which record fields a search looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFields {
    /// Whatever the backend considers searchable.
    All,
    Named(Vec<String>),
}

/// A directory search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub fields: SearchFields,
    pub value: String,
    /// Exact match instead of substring match.
    pub exact: bool,
}

impl SearchQuery {
    /// Exact match on a single field.
    pub fn exact(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            fields: SearchFields::Named(vec![field.into()]),
            value: value.into(),
            exact: true,
        }
    }

    /// Search every searchable field.
    pub fn any_field(value: impl Into<String>, exact: bool) -> Self {
        Self {
            fields: SearchFields::All,
            value: value.into(),
            exact,
        }
    }
}

/// Records returned by one search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    pub records: Vec<DirectoryRecord>,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record, if the search matched exactly one. No match and several
    /// matches are both treated as "no authoritative data".
    pub fn into_single(self) -> Option<DirectoryRecord> {
        let mut records = self.records;
        if records.len() == 1 {
            records.pop()
        } else {
            None
        }
    }
}

/// A connected directory client.
#[async_trait]
pub trait DirectoryLookup: Send {
    /// Whether the client can serve searches.
    fn is_ready(&self) -> bool;

    async fn search(&mut self, query: &SearchQuery) -> Result<SearchResults, DirectoryError>;

    /// Release the connection. The client is not ready afterwards.
    async fn close(&mut self) -> Result<(), DirectoryError> {
        Ok(())
    }
}

#[async_trait]
impl DirectoryLookup for Box<dyn DirectoryLookup> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    async fn search(&mut self, query: &SearchQuery) -> Result<SearchResults, DirectoryError> {
        (**self).search(query).await
    }

    async fn close(&mut self) -> Result<(), DirectoryError> {
        (**self).close().await
    }
}

/// Creates directory clients scoped to a mail domain.
///
/// A fresh client is created for every reconciliation; clients are never
/// shared between logins.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self, mail_domain: &str) -> Result<Box<dyn DirectoryLookup>, DirectoryError>;
}
