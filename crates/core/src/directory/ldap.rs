//! LDAP directory backend built on `ldap3`.
//!
//! [`LdapDirectory`] is a generic client: it connects, binds with the
//! service account, and turns search results into [`DirectoryRecord`]s
//! through the address book's ordered field map. [`LdapConnector`] is what
//! the orchestrator uses; it wraps each client in a
//! [`SearchFieldsOverride`] carrying the address book's `search_fields`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, info, warn};

use super::{
    DirectoryConnector, DirectoryLookup, DirectoryRecord, SearchFields, SearchFieldsOverride,
    SearchQuery, SearchResults,
};
use crate::config::{AddressBookConfig, DirectoryConfig, FieldMapping, SearchScope};
use crate::errors::DirectoryError;

/// Log at `info` when the directory debug flag is set, `debug` otherwise.
macro_rules! trace_ldap {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Builds an [`LdapDirectory`] per reconciliation from one address book.
#[derive(Debug, Clone)]
pub struct LdapConnector {
    book: AddressBookConfig,
    debug: bool,
}

impl LdapConnector {
    pub fn new(book: AddressBookConfig, debug: bool) -> Self {
        Self { book, debug }
    }

    /// Connector for the selected address book, `None` if it is not configured.
    pub fn from_config(config: &DirectoryConfig) -> Option<Self> {
        config
            .selected()
            .map(|book| Self::new(book.clone(), config.debug))
    }

    pub fn address_book(&self) -> &AddressBookConfig {
        &self.book
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self, mail_domain: &str) -> Result<Box<dyn DirectoryLookup>, DirectoryError> {
        let client = LdapDirectory::connect(&self.book, self.debug, mail_domain).await?;
        Ok(Box::new(SearchFieldsOverride::new(
            client,
            self.book.search_fields.clone(),
        )))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A bound LDAP connection scoped to one mail domain.
pub struct LdapDirectory {
    ldap: Ldap,
    base_dn: String,
    filter: String,
    scope: Scope,
    fieldmap: Vec<FieldMapping>,
    timeout: Duration,
    debug: bool,
    ready: bool,
}

impl LdapDirectory {
    /// Connect to `book.url` and bind.
    ///
    /// `%d` / `%dc` in the base DN, bind DN and filter are expanded with
    /// `mail_domain`. Connect and bind are each bounded by the address
    /// book's timeout.
    pub async fn connect(
        book: &AddressBookConfig,
        debug: bool,
        mail_domain: &str,
    ) -> Result<Self, DirectoryError> {
        let timeout = Duration::from_secs(book.timeout_secs);
        trace_ldap!(debug, url = %book.url, mail_domain, "connecting to LDAP server");

        let settings = LdapConnSettings::new().set_conn_timeout(timeout);
        let (conn, mut ldap) = bounded(timeout, LdapConnAsync::with_settings(settings, &book.url))
            .await?
            .map_err(|e| DirectoryError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        if let Some(ref bind_dn) = book.bind_dn {
            let bind_dn = expand_domain_placeholders(bind_dn, mail_domain);
            let password = book.bind_password.as_deref().unwrap_or("");
            trace_ldap!(debug, bind_dn = %bind_dn, "binding to LDAP server");
            bounded(timeout, ldap.simple_bind(&bind_dn, password))
                .await?
                .map_err(|e| DirectoryError::Bind(e.to_string()))?
                .success()
                .map_err(|e| DirectoryError::Bind(format!("bind rejected: {e:?}")))?;
        }

        Ok(Self {
            ldap,
            base_dn: expand_domain_placeholders(&book.base_dn, mail_domain),
            filter: expand_domain_placeholders(&book.filter, mail_domain),
            scope: to_ldap_scope(book.scope),
            fieldmap: book.fieldmap.clone(),
            timeout,
            debug,
            ready: true,
        })
    }

    /// LDAP attributes a query targets.
    fn attributes_for(&self, fields: &SearchFields) -> Vec<String> {
        match fields {
            SearchFields::All => {
                let mut attrs: Vec<String> = Vec::new();
                for mapping in &self.fieldmap {
                    if !attrs.iter().any(|a| a.eq_ignore_ascii_case(&mapping.attribute)) {
                        attrs.push(mapping.attribute.clone());
                    }
                }
                attrs
            }
            SearchFields::Named(names) => names
                .iter()
                .map(|name| attribute_for_field(&self.fieldmap, name).to_string())
                .collect(),
        }
    }
}

#[async_trait]
impl DirectoryLookup for LdapDirectory {
    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn search(&mut self, query: &SearchQuery) -> Result<SearchResults, DirectoryError> {
        if !self.ready {
            return Err(DirectoryError::NotReady);
        }

        let attributes = self.attributes_for(&query.fields);
        let filter = build_filter(&self.filter, &attributes, &query.value, query.exact);
        trace_ldap!(self.debug, base_dn = %self.base_dn, filter = %filter, "searching LDAP");

        let wanted: Vec<String> = self.fieldmap.iter().map(|m| m.attribute.clone()).collect();
        let outcome = bounded(
            self.timeout,
            self.ldap.search(&self.base_dn, self.scope, &filter, wanted),
        )
        .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.ready = false;
                return Err(DirectoryError::Search(e.to_string()));
            }
            Err(e) => {
                self.ready = false;
                return Err(e);
            }
        };

        let (entries, _) = result
            .success()
            .map_err(|e| DirectoryError::Search(format!("{e:?}")))?;

        let records: Vec<DirectoryRecord> = entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| entry_to_record(entry, &self.fieldmap))
            .collect();

        trace_ldap!(self.debug, count = records.len(), "LDAP search complete");
        Ok(SearchResults { records })
    }

    async fn close(&mut self) -> Result<(), DirectoryError> {
        if !self.ready {
            return Ok(());
        }
        self.ready = false;
        trace_ldap!(self.debug, "unbinding from LDAP server");
        bounded(self.timeout, self.ldap.unbind())
            .await?
            .map_err(|e| DirectoryError::Connection(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Run `fut` with an upper bound of `timeout`.
async fn bounded<F: Future>(timeout: Duration, fut: F) -> Result<F::Output, DirectoryError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| DirectoryError::Timeout {
            secs: timeout.as_secs(),
        })
}

fn to_ldap_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Sub => Scope::Subtree,
    }
}

/// The LDAP attribute behind a record field. Fields missing from the map are
/// taken to be attribute names already (e.g. `uid`).
pub fn attribute_for_field<'a>(fieldmap: &'a [FieldMapping], field: &'a str) -> &'a str {
    fieldmap
        .iter()
        .find(|m| m.field == field)
        .map(|m| m.attribute.as_str())
        .unwrap_or(field)
}

/// `(&<base>(attr=value))`, or an OR over several attributes. The value is
/// escaped per RFC 4515; a substring search wraps it in `*`.
pub fn build_filter(base_filter: &str, attributes: &[String], value: &str, exact: bool) -> String {
    let escaped = ldap_escape(value);
    let term = if exact {
        escaped.into_owned()
    } else {
        format!("*{}*", escaped)
    };

    let mut terms: Vec<String> = attributes
        .iter()
        .map(|attr| format!("({}={})", attr, term))
        .collect();
    let matcher = match terms.len() {
        0 => String::new(),
        1 => terms.remove(0),
        _ => format!("(|{})", terms.concat()),
    };

    let base = base_filter.trim();
    if base.is_empty() {
        return matcher;
    }
    let base = if base.starts_with('(') {
        base.to_string()
    } else {
        format!("({})", base)
    };
    format!("(&{}{})", base, matcher)
}

/// Replace `%dc` with `dc=` components of `domain` and `%d` with the domain.
pub fn expand_domain_placeholders(template: &str, domain: &str) -> String {
    let dc = domain
        .split('.')
        .filter(|label| !label.is_empty())
        .map(|label| format!("dc={}", label))
        .collect::<Vec<_>>()
        .join(",");
    template.replace("%dc", &dc).replace("%d", domain)
}

/// Convert an LDAP entry into a record with fields in field-map order.
/// Attribute names compare case-insensitively; absent attributes are skipped.
pub fn entry_to_record(entry: SearchEntry, fieldmap: &[FieldMapping]) -> DirectoryRecord {
    let mut record = DirectoryRecord::with_id(entry.dn);
    for mapping in fieldmap {
        let values = entry
            .attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&mapping.attribute))
            .map(|(_, values)| values);
        if let Some(values) = values {
            if !values.is_empty() {
                record.insert(mapping.field.clone(), values.clone());
            }
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::directory::FieldValue;

    fn fieldmap() -> Vec<FieldMapping> {
        vec![
            FieldMapping::new("firstname", "givenName"),
            FieldMapping::new("surname", "sn"),
            FieldMapping::new("email", "mail"),
            FieldMapping::new("email:work", "workMail"),
            FieldMapping::new("aliases", "mailAlternateAddress"),
        ]
    }

    #[test]
    fn test_build_filter_exact() {
        assert_eq!(
            build_filter("(objectClass=person)", &["uid".into()], "alice", true),
            "(&(objectClass=person)(uid=alice))"
        );
    }

    #[test]
    fn test_build_filter_substring_multi_attribute() {
        assert_eq!(
            build_filter("objectClass=*", &["mail".into(), "cn".into()], "ali", false),
            "(&(objectClass=*)(|(mail=*ali*)(cn=*ali*)))"
        );
    }

    #[test]
    fn test_build_filter_escapes_value() {
        assert_eq!(
            build_filter("", &["uid".into()], "a*)(uid=*", true),
            "(uid=a\\2a\\29\\28uid=\\2a)"
        );
    }

    #[test]
    fn test_attribute_for_field() {
        let map = fieldmap();
        assert_eq!(attribute_for_field(&map, "email"), "mail");
        assert_eq!(attribute_for_field(&map, "uid"), "uid");
    }

    #[test]
    fn test_expand_domain_placeholders() {
        assert_eq!(
            expand_domain_placeholders("ou=people,%dc", "mail.example.com"),
            "ou=people,dc=mail,dc=example,dc=com"
        );
        assert_eq!(
            expand_domain_placeholders("(mail=*@%d)", "example.com"),
            "(mail=*@example.com)"
        );
        assert_eq!(expand_domain_placeholders("dc=static", "example.com"), "dc=static");
    }

    #[test]
    fn test_entry_to_record_follows_fieldmap_order() {
        let entry = SearchEntry {
            dn: "uid=alice,ou=people,dc=x,dc=com".into(),
            attrs: HashMap::from([
                ("mailalternateaddress".to_string(), vec!["a.smith@x.com".to_string()]),
                ("mail".to_string(), vec!["alice@x.com".to_string()]),
                ("sn".to_string(), vec!["Smith".to_string()]),
                ("givenName".to_string(), vec!["Alice".to_string()]),
                ("workMail".to_string(), Vec::new()),
                ("telephoneNumber".to_string(), vec!["555".to_string()]),
            ]),
            bin_attrs: HashMap::new(),
        };

        let record = entry_to_record(entry, &fieldmap());
        assert_eq!(record.id.as_deref(), Some("uid=alice,ou=people,dc=x,dc=com"));
        let names: Vec<&str> = record.fields().map(|(name, _)| name).collect();
        assert_eq!(names, ["firstname", "surname", "email", "aliases"]);
        assert_eq!(record.get("email"), Some(&FieldValue::One("alice@x.com".into())));
    }

    #[test]
    fn test_entry_with_multi_valued_mail() {
        let entry = SearchEntry {
            dn: "uid=bob".into(),
            attrs: HashMap::from([(
                "mail".to_string(),
                vec!["bob@x.com".to_string(), "robert@x.com".to_string()],
            )]),
            bin_attrs: HashMap::new(),
        };
        let record = entry_to_record(entry, &fieldmap());
        assert_eq!(
            record.get("email"),
            Some(&FieldValue::Many(vec!["bob@x.com".into(), "robert@x.com".into()]))
        );
    }

    #[test]
    fn test_connector_from_config() {
        let config = DirectoryConfig {
            addressbook: "corp".into(),
            debug: true,
            mail_domain: None,
            addressbooks: HashMap::from([(
                "corp".to_string(),
                AddressBookConfig::new("ldap://localhost", "dc=test"),
            )]),
        };
        let connector = LdapConnector::from_config(&config).unwrap();
        assert_eq!(connector.address_book().url, "ldap://localhost");

        let missing = DirectoryConfig {
            addressbook: "other".into(),
            ..config
        };
        assert!(LdapConnector::from_config(&missing).is_none());
    }

    /// Accepts TCP connections and never answers.
    async fn silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("ldap://{}", addr)
    }

    fn silent_book(url: &str) -> AddressBookConfig {
        let mut book = AddressBookConfig::new(url, "dc=test");
        book.timeout_secs = 1;
        book.fieldmap = fieldmap();
        book
    }

    #[tokio::test]
    async fn test_bind_times_out_against_silent_server() {
        let url = silent_server().await;
        let mut book = silent_book(&url);
        book.bind_dn = Some("cn=admin,%dc".into());
        book.bind_password = Some("secret".into());

        let started = std::time::Instant::now();
        let result = LdapDirectory::connect(&book, false, "example.com").await;
        assert!(started.elapsed() < Duration::from_secs(3));
        match result {
            Err(DirectoryError::Timeout { secs }) => assert_eq!(secs, 1),
            Err(other) => panic!("expected timeout, got {other}"),
            Ok(_) => panic!("bind against a silent server succeeded"),
        }
    }

    #[tokio::test]
    async fn test_search_times_out_against_silent_server() {
        let url = silent_server().await;
        let book = silent_book(&url);
        let mut client = match LdapDirectory::connect(&book, false, "example.com").await {
            Ok(client) => client,
            Err(e) => panic!("connect without bind failed: {e}"),
        };
        assert!(client.is_ready());

        let started = std::time::Instant::now();
        let result = client.search(&SearchQuery::exact("uid", "alice")).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(matches!(result, Err(DirectoryError::Timeout { secs: 1 })));
        assert!(!client.is_ready());

        let result = client.search(&SearchQuery::exact("uid", "alice")).await;
        assert!(matches!(result, Err(DirectoryError::NotReady)));
    }

    #[tokio::test]
    async fn test_close_leaves_client_not_ready() {
        let url = silent_server().await;
        let book = silent_book(&url);
        let mut client = match LdapDirectory::connect(&book, false, "example.com").await {
            Ok(client) => client,
            Err(e) => panic!("connect without bind failed: {e}"),
        };

        let started = std::time::Instant::now();
        let result = client.close().await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(matches!(result, Ok(()) | Err(DirectoryError::Timeout { .. })));
        assert!(!client.is_ready());

        // A second close has nothing to release.
        assert!(client.close().await.is_ok());
        assert!(matches!(
            client.search(&SearchQuery::exact("uid", "alice")).await,
            Err(DirectoryError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        let mut book = AddressBookConfig::new("ldap://127.0.0.1:1", "dc=test");
        book.timeout_secs = 1;
        let result = LdapDirectory::connect(&book, false, "example.com").await;
        assert!(matches!(
            result,
            Err(DirectoryError::Connection(_)) | Err(DirectoryError::Timeout { .. })
        ));
    }
}
