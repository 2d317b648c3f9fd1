//! TOML-based configuration system for AddrSync.
//!
//! Sensitive values (the directory bind password) are stored as `_env` fields
//! that reference environment variable names. The actual secrets are resolved
//! at runtime via [`AppConfig::resolve_env_vars`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::identity::idn;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging and storage settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Directory (address book) settings.
    pub directory: DirectoryConfig,

    /// Built-in `identity_create` policy settings.
    #[serde(default)]
    pub hooks: HooksConfig,
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory holding the identity database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/addrsync")
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl GeneralConfig {
    /// Path of the SQLite identity database inside `data_dir`.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("addrsync.db")
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Mail domain used to scope directory searches.
///
/// Either one domain for every mail host, or a table from IMAP host to domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MailDomain {
    Single(String),
    PerHost(HashMap<String, String>),
}

/// Directory selection and connection properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Name of the entry in `addressbooks` used for synchronization.
    pub addressbook: String,

    /// Log LDAP filters and result counts at `info` instead of `debug`.
    #[serde(default)]
    pub debug: bool,

    /// Mail domain mapping. When absent, the mail host itself is used.
    #[serde(default)]
    pub mail_domain: Option<MailDomain>,

    /// All configured address books, keyed by name.
    #[serde(default)]
    pub addressbooks: HashMap<String, AddressBookConfig>,
}

impl DirectoryConfig {
    /// The address book selected by [`addressbook`](Self::addressbook).
    pub fn selected(&self) -> Option<&AddressBookConfig> {
        self.addressbooks.get(&self.addressbook)
    }

    /// Resolve the mail domain for `host`, IDN-encoded.
    pub fn mail_domain(&self, host: &str) -> String {
        MailDomain::resolve(self.mail_domain.as_ref(), host)
    }
}

impl MailDomain {
    /// Mail domain for `host` under `mapping`, IDN-encoded. Hosts missing
    /// from the mapping, and an absent or empty mapping, fall back to the
    /// host itself.
    pub fn resolve(mapping: Option<&MailDomain>, host: &str) -> String {
        let domain = match mapping {
            Some(MailDomain::PerHost(map)) => map.get(host).map(String::as_str).unwrap_or(host),
            Some(MailDomain::Single(domain)) if !domain.is_empty() => domain.as_str(),
            _ => host,
        };
        idn::domain_to_ascii(domain).unwrap_or_else(|| domain.to_string())
    }
}

/// LDAP search scope.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Base,
    #[serde(alias = "one")]
    OneLevel,
    #[default]
    Sub,
}

/// Maps one directory record field to the LDAP attribute it is read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldMapping {
    /// Record field name, e.g. `email` or `email:work`.
    pub field: String,
    /// LDAP attribute name, e.g. `mail`.
    pub attribute: String,
}

impl FieldMapping {
    pub fn new(field: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            attribute: attribute.into(),
        }
    }
}

/// Connection properties of one LDAP address book.
///
/// `base_dn`, `bind_dn` and `filter` may contain `%d` (mail domain) and `%dc`
/// (mail domain as `dc=` components).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressBookConfig {
    /// Server URL, `ldap://` or `ldaps://`.
    pub url: String,

    /// Search base.
    pub base_dn: String,

    /// Service account DN. Anonymous bind when absent.
    #[serde(default)]
    pub bind_dn: Option<String>,

    /// Environment variable holding the bind password.
    #[serde(default)]
    pub bind_password_env: Option<String>,

    /// Filter every search is restricted to.
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default)]
    pub scope: SearchScope,

    /// Upper bound for connect, bind and search, each.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Fields searched when a query targets "all fields".
    #[serde(default = "default_search_fields")]
    pub search_fields: Vec<String>,

    /// Ordered record field to attribute mapping.
    #[serde(default = "default_fieldmap")]
    pub fieldmap: Vec<FieldMapping>,

    /// Resolved bind password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub bind_password: Option<String>,
}

fn default_filter() -> String {
    "(objectClass=*)".into()
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_search_fields() -> Vec<String> {
    vec!["mail".into(), "cn".into()]
}
fn default_fieldmap() -> Vec<FieldMapping> {
    vec![
        FieldMapping::new("firstname", "givenName"),
        FieldMapping::new("surname", "sn"),
        FieldMapping::new("email", "mail"),
        FieldMapping::new("aliases", "mailAlternateAddress"),
    ]
}

impl AddressBookConfig {
    /// Minimal address book with every optional property at its default.
    pub fn new(url: impl Into<String>, base_dn: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_dn: base_dn.into(),
            bind_dn: None,
            bind_password_env: None,
            filter: default_filter(),
            scope: SearchScope::default(),
            timeout_secs: default_timeout_secs(),
            search_fields: default_search_fields(),
            fieldmap: default_fieldmap(),
            bind_password: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Settings for the built-in identity creation policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Only create identities in these domains. Empty allows every domain.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the bind password of every address book from its `_env` field.
    ///
    /// Missing variables only log a warning; an address book without a
    /// password falls back to an anonymous-style bind with an empty secret.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        for (name, book) in self.directory.addressbooks.iter_mut() {
            if let Some(ref env_name) = book.bind_password_env {
                let field = format!("directory.addressbooks.{}.bind_password_env", name);
                book.bind_password = resolve_optional_env(env_name, &field);
            }
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.directory.addressbook;
        let book = self
            .directory
            .selected()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "directory.addressbook".into(),
                detail: format!("no address book named '{}' is configured", name),
            })?;

        let prefix = format!("directory.addressbooks.{}", name);
        if !(book.url.starts_with("ldap://") || book.url.starts_with("ldaps://")) {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.url", prefix),
                detail: "URL must start with ldap:// or ldaps://".into(),
            });
        }
        if book.base_dn.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.base_dn", prefix),
                detail: "base DN must not be empty".into(),
            });
        }
        if book.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.timeout_secs", prefix),
                detail: "timeout must be > 0".into(),
            });
        }
        if book.fieldmap.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.fieldmap", prefix),
                detail: "field map must not be empty".into(),
            });
        }
        for (i, mapping) in book.fieldmap.iter().enumerate() {
            if book.fieldmap[..i].iter().any(|m| m.field == mapping.field) {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}.fieldmap", prefix),
                    detail: format!(
                        "field '{}' is mapped more than once; use a qualified name such as '{}:2'",
                        mapping.field, mapping.field
                    ),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[general]
log_level = "debug"
data_dir = "/tmp/addrsync"

[directory]
addressbook = "corp"
debug = true
mail_domain = "example.com"

[directory.addressbooks.corp]
url = "ldaps://ldap.example.com:636"
base_dn = "ou=people,%dc"
bind_dn = "cn=reader,%dc"
bind_password_env = "LDAP_PASSWORD"
filter = "(objectClass=inetOrgPerson)"
scope = "one"
timeout_secs = 3
search_fields = ["mail"]
fieldmap = [
  { field = "firstname", attribute = "givenName" },
  { field = "surname", attribute = "sn" },
  { field = "email", attribute = "mail" },
  { field = "email:work", attribute = "workMail" },
]

[hooks]
allowed_domains = ["example.com"]
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.general.log_level, "debug");
        assert!(config.directory.debug);
        let book = config.directory.selected().unwrap();
        assert_eq!(book.scope, SearchScope::OneLevel);
        assert_eq!(book.timeout_secs, 3);
        assert_eq!(book.fieldmap[3], FieldMapping::new("email:work", "workMail"));
        assert_eq!(config.hooks.allowed_domains, vec!["example.com"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.directory.addressbook, "corp");
        assert_eq!(
            config.general.database_path(),
            PathBuf::from("/tmp/addrsync/addrsync.db")
        );
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_addressbook() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.directory.addressbook = "missing".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "directory.addressbook"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_fieldmap_field() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        let book = config.directory.addressbooks.get_mut("corp").unwrap();
        book.fieldmap.push(FieldMapping::new("aliases", "mailAlternateAddress"));
        book.fieldmap.push(FieldMapping::new("aliases", "proxyAddresses"));

        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, ref detail })
                if field == "directory.addressbooks.corp.fieldmap" && detail.contains("'aliases'")
        ));

        let book = config.directory.addressbooks.get_mut("corp").unwrap();
        book.fieldmap[5] = FieldMapping::new("aliases:proxy", "proxyAddresses");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config
            .directory
            .addressbooks
            .get_mut("corp")
            .unwrap()
            .url = "http://ldap.example.com".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "directory.addressbooks.corp.url"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_ADDRSYNC_LDAP_PW", "s3cret");

        let toml_str = r#"
[directory]
addressbook = "corp"
[directory.addressbooks.corp]
url = "ldap://localhost"
base_dn = "dc=test"
bind_dn = "cn=admin,dc=test"
bind_password_env = "TEST_ADDRSYNC_LDAP_PW"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();

        assert_eq!(
            config.directory.selected().unwrap().bind_password.as_deref(),
            Some("s3cret")
        );

        std::env::remove_var("TEST_ADDRSYNC_LDAP_PW");
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[directory]
addressbook = "corp"
[directory.addressbooks.corp]
url = "ldap://localhost"
base_dn = "dc=test"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.general.log_level, "info");
        assert!(!config.directory.debug);
        let book = config.directory.selected().unwrap();
        assert_eq!(book.filter, "(objectClass=*)");
        assert_eq!(book.scope, SearchScope::Sub);
        assert_eq!(book.timeout_secs, 5);
        assert_eq!(book.fieldmap[2], FieldMapping::new("email", "mail"));
        assert!(config.hooks.allowed_domains.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_mail_domain_resolution() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(config.directory.mail_domain("imap.other.org"), "example.com");

        config.directory.mail_domain = Some(MailDomain::PerHost(HashMap::from([(
            "imap.a.org".to_string(),
            "a.org".to_string(),
        )])));
        assert_eq!(config.directory.mail_domain("imap.a.org"), "a.org");
        assert_eq!(config.directory.mail_domain("imap.b.org"), "imap.b.org");

        config.directory.mail_domain = None;
        assert_eq!(config.directory.mail_domain("mail.bücher.de"), "mail.xn--bcher-kva.de");
    }

    #[test]
    fn test_mail_domain_table_from_toml() {
        let toml_str = r#"
[directory]
addressbook = "corp"
[directory.mail_domain]
"imap.a.org" = "a.org"
[directory.addressbooks.corp]
url = "ldap://localhost"
base_dn = "dc=test"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.directory.mail_domain("imap.a.org"), "a.org");
    }
}
