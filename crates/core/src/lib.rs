//! AddrSync core library.
//!
//! Keeps a mail user's sender identities in line with their directory entry:
//! configuration, directory lookup backends, record parsing and diffing,
//! SQLite identity storage, and the login-time [`SyncOrchestrator`].

pub mod config;
pub mod db;
pub mod directory;
pub mod errors;
pub mod identity;
pub mod sync_engine;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use directory::{DirectoryConnector, DirectoryLookup, LdapConnector};
pub use identity::{IdentityCreateHook, IdentityStore};
pub use sync_engine::{LoginEvent, SyncOrchestrator, SyncOutcome, SyncPlan};
