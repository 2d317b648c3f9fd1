//! Wrapper that fixes the field list used for "all fields" searches.

use async_trait::async_trait;
use tracing::debug;

use super::{DirectoryLookup, SearchFields, SearchQuery, SearchResults};
use crate::errors::DirectoryError;

/// Delegates to `inner`, rewriting [`SearchFields::All`] to a fixed list.
///
/// Queries that already name their fields pass through untouched, as does
/// everything when the list is empty.
pub struct SearchFieldsOverride<C> {
    inner: C,
    fields: Vec<String>,
}

impl<C: DirectoryLookup> SearchFieldsOverride<C> {
    pub fn new(inner: C, fields: Vec<String>) -> Self {
        Self { inner, fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn rewrite(&self, query: &SearchQuery) -> Option<SearchQuery> {
        match query.fields {
            SearchFields::All if !self.fields.is_empty() => Some(SearchQuery {
                fields: SearchFields::Named(self.fields.clone()),
                ..query.clone()
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl<C: DirectoryLookup> DirectoryLookup for SearchFieldsOverride<C> {
    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    async fn search(&mut self, query: &SearchQuery) -> Result<SearchResults, DirectoryError> {
        match self.rewrite(query) {
            Some(rewritten) => {
                debug!(fields = ?self.fields, "searching configured fields");
                self.inner.search(&rewritten).await
            }
            None => self.inner.search(query).await,
        }
    }

    async fn close(&mut self) -> Result<(), DirectoryError> {
        self.inner.close().await
    }
}
