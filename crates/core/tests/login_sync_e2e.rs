//! End-to-end tests for login-time identity reconciliation.
//!
//! These tests exercise the real `SyncOrchestrator` with:
//! - A configuration file loaded from disk
//! - Real on-disk SQLite databases
//! - An in-process directory backend serving fixed records
//!
//! No network I/O: the directory backend never leaves the process.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Barrier;

use addrsync_core::config::AppConfig;
use addrsync_core::db::Database;
use addrsync_core::directory::{
    DirectoryConnector, DirectoryLookup, DirectoryRecord, SearchFields, SearchFieldsOverride,
    SearchQuery, SearchResults,
};
use addrsync_core::errors::DirectoryError;
use addrsync_core::identity::{DomainAllowlistHook, HookChain, IdentityStore};
use addrsync_core::sync_engine::{AbortReason, LoginEvent, SyncOrchestrator, SyncOutcome};

// ===========================================================================
// Helpers
// ===========================================================================

/// Serves records keyed by `uid` for one mail domain.
#[derive(Clone)]
struct StaticDirectory {
    domain: String,
    entries: Arc<Mutex<Vec<(String, DirectoryRecord)>>>,
    /// Holds every search until this many clients are searching.
    rendezvous: Option<Arc<Barrier>>,
}

struct StaticClient {
    entries: Vec<(String, DirectoryRecord)>,
    rendezvous: Option<Arc<Barrier>>,
}

impl StaticDirectory {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            entries: Arc::new(Mutex::new(Vec::new())),
            rendezvous: None,
        }
    }

    fn with_rendezvous(mut self, searches: usize) -> Self {
        self.rendezvous = Some(Arc::new(Barrier::new(searches)));
        self
    }

    fn put(&self, uid: &str, record: DirectoryRecord) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|(existing, _)| existing != uid);
        entries.push((uid.to_string(), record));
    }
}

#[async_trait]
impl DirectoryConnector for StaticDirectory {
    async fn connect(&self, mail_domain: &str) -> Result<Box<dyn DirectoryLookup>, DirectoryError> {
        if mail_domain != self.domain {
            return Err(DirectoryError::Connection(format!("no directory for {mail_domain}")));
        }
        let client = StaticClient {
            entries: self.entries.lock().unwrap().clone(),
            rendezvous: self.rendezvous.clone(),
        };
        Ok(Box::new(SearchFieldsOverride::new(client, vec!["uid".into()])))
    }
}

#[async_trait]
impl DirectoryLookup for StaticClient {
    fn is_ready(&self) -> bool {
        true
    }

    async fn search(&mut self, query: &SearchQuery) -> Result<SearchResults, DirectoryError> {
        assert_eq!(query.fields, SearchFields::Named(vec!["uid".into()]));
        if let Some(barrier) = &self.rendezvous {
            barrier.wait().await;
        }
        let records = self
            .entries
            .iter()
            .filter(|(uid, _)| {
                if query.exact {
                    *uid == query.value
                } else {
                    uid.contains(&query.value)
                }
            })
            .map(|(_, record)| record.clone())
            .collect();
        Ok(SearchResults { records })
    }
}

fn write_config(dir: &Path) -> AppConfig {
    let path = dir.join("addrsync.toml");
    let toml = format!(
        r#"
[general]
data_dir = "{data_dir}"

[directory]
addressbook = "corp"

[directory.mail_domain]
"imap.example.com" = "example.com"
"imap.bücher.de" = "bücher.de"

[directory.addressbooks.corp]
url = "ldap://127.0.0.1:389"
base_dn = "ou=people,dc=%dc"

[hooks]
allowed_domains = ["example.com", "xn--bcher-kva.de"]
"#,
        data_dir = dir.display()
    );
    std::fs::write(&path, toml).unwrap();
    AppConfig::load_and_resolve(&path).unwrap()
}

fn person(first: &str, last: &str, email: &str, aliases: &[&str]) -> DirectoryRecord {
    DirectoryRecord::new()
        .with("firstname", first)
        .with("surname", last)
        .with("email", email)
        .with("aliases", aliases.to_vec())
}

fn orchestrator<'a>(
    db: &'a Database,
    config: &AppConfig,
    directory: &StaticDirectory,
) -> SyncOrchestrator<&'a Database> {
    SyncOrchestrator::new(db, directory.clone())
        .with_hook(HookChain::new().with(DomainAllowlistHook::new(&config.hooks.allowed_domains)))
        .with_mail_domain(config.directory.mail_domain.clone())
}

fn stored(db: &Database, user_id: i64) -> Vec<String> {
    db.list_emails(user_id)
        .unwrap()
        .into_iter()
        .map(|identity| identity.email)
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_directory_changes_follow_through_logins() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let db = Database::new(config.general.database_path()).unwrap();
    db.initialize().unwrap();

    let directory = StaticDirectory::new("example.com");
    directory.put(
        "alice",
        person(
            "Alice",
            "Smith",
            "alice@example.com",
            &["a.smith@example.com", "alice@partner.org"],
        ),
    );

    let orch = orchestrator(&db, &config, &directory);
    let login = LoginEvent::new("alice", "imap.example.com", 10);

    // First login: the partner.org alias is outside the allow list.
    let outcome = orch.on_login(&login).await.unwrap();
    match outcome {
        SyncOutcome::Applied(stats) => {
            assert_eq!(stats.created, 2);
            assert_eq!(stats.vetoed, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(stored(&db, 10), vec!["alice@example.com", "a.smith@example.com"]);

    // The directory drops the alias and adds a new one.
    directory.put(
        "alice",
        person("Alice", "Smith", "alice@example.com", &["alice.smith@example.com"]),
    );
    orch.on_login(&login).await.unwrap();
    assert_eq!(stored(&db, 10), vec!["alice@example.com", "alice.smith@example.com"]);

    let primary = &db.list_emails(10).unwrap()[0];
    assert!(primary.standard);
    assert_eq!(primary.name, "Alice Smith");
}

#[tokio::test]
async fn test_identities_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let path = config.general.database_path();

    let directory = StaticDirectory::new("example.com");
    directory.put("bob", person("Bob", "Jones", "bob@example.com", &[]));

    {
        let db = Database::new(&path).unwrap();
        db.initialize().unwrap();
        orchestrator(&db, &config, &directory)
            .on_login(&LoginEvent::new("bob", "imap.example.com", 20))
            .await
            .unwrap();
    }

    let db = Database::new(&path).unwrap();
    db.initialize().unwrap();
    assert_eq!(stored(&db, 20), vec!["bob@example.com"]);

    // Unchanged directory entry: nothing to do on the next login.
    let outcome = orchestrator(&db, &config, &directory)
        .on_login(&LoginEvent::new("bob", "imap.example.com", 20))
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Applied(Default::default()));
}

#[tokio::test]
async fn test_two_handles_do_not_duplicate_identities() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let path = config.general.database_path();

    let first = Database::new(&path).unwrap();
    first.initialize().unwrap();
    let second = Database::new(&path).unwrap();
    second.initialize().unwrap();

    // Both runs list the (empty) stored identities before either inserts.
    let directory = StaticDirectory::new("example.com").with_rendezvous(2);
    directory.put("carol", person("Carol", "White", "carol@example.com", &[]));
    let login = LoginEvent::new("carol", "imap.example.com", 30);

    let a = orchestrator(&first, &config, &directory);
    let b = orchestrator(&second, &config, &directory);
    let (ra, rb) = tokio::join!(a.on_login(&login), b.on_login(&login));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    let inserts = [ra, rb]
        .into_iter()
        .map(|outcome| match outcome {
            SyncOutcome::Applied(stats) => stats.created + stats.existing,
            other => panic!("unexpected outcome: {other:?}"),
        })
        .sum::<usize>();
    assert_eq!(inserts, 2);
    assert_eq!(stored(&first, 30), vec!["carol@example.com"]);
    assert_eq!(second.list_emails(30).unwrap().len(), 1);
}

#[tokio::test]
async fn test_idn_domain_resolves_and_normalizes() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let db = Database::in_memory().unwrap();
    db.initialize().unwrap();

    let directory = StaticDirectory::new("xn--bcher-kva.de");
    directory.put("dora", person("Dora", "Weiß", "dora@bücher.de", &[]));

    let outcome = orchestrator(&db, &config, &directory)
        .on_login(&LoginEvent::new("dora", "imap.bücher.de", 40))
        .await
        .unwrap();
    assert!(matches!(outcome, SyncOutcome::Applied(_)));
    assert_eq!(stored(&db, 40), vec!["dora@xn--bcher-kva.de"]);
}

#[tokio::test]
async fn test_unknown_host_leaves_identities_alone() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let db = Database::in_memory().unwrap();
    db.initialize().unwrap();

    let directory = StaticDirectory::new("example.com");
    directory.put("erin", person("Erin", "Black", "erin@example.com", &[]));

    let login = LoginEvent::new("erin", "imap.elsewhere.net", 50)
        .with_payload(serde_json::json!({ "valid": true }));
    let orch = orchestrator(&db, &config, &directory);

    let outcome = orch.on_login(&login).await.unwrap();
    assert!(matches!(
        outcome,
        SyncOutcome::Aborted(AbortReason::DirectoryUnavailable { .. })
    ));
    assert!(stored(&db, 50).is_empty());

    assert_eq!(orch.login_after(login.clone()).await, login);
}
