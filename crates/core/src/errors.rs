//! Error types for the AddrSync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite identity store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Directory errors
// ---------------------------------------------------------------------------

/// Errors from the directory lookup backend.
///
/// None of these ever reach the login flow: the orchestrator turns them into
/// an aborted reconciliation.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The server could not be reached or the connection dropped.
    #[error("directory connection failed: {0}")]
    Connection(String),

    /// The service account bind was rejected.
    #[error("directory bind failed: {0}")]
    Bind(String),

    /// A search request failed on the server side.
    #[error("directory search failed: {0}")]
    Search(String),

    /// The operation did not complete within the configured timeout.
    #[error("directory operation timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The client exists but is not in a usable state.
    #[error("directory client is not ready")]
    NotReady,
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// A single failed store write during the apply phase.
#[derive(Debug)]
pub struct StoreWriteFailure {
    /// `"insert"` or `"delete"`.
    pub operation: &'static str,
    /// Email address of the identity the write was about.
    pub email: String,
    pub source: DatabaseError,
}

impl std::fmt::Display for StoreWriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}': {}", self.operation, self.email, self.source)
    }
}

/// Errors from the reconciliation orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The current identities could not be loaded.
    #[error("failed to load identities for user {user_id}: {source}")]
    LoadIdentities {
        user_id: i64,
        #[source]
        source: DatabaseError,
    },

    /// One or more creates/deletes failed. Writes that succeeded in the same
    /// run are kept.
    #[error("{} identity write(s) failed: {}", .failures.len(), join_failures(.failures))]
    StoreWrite { failures: Vec<StoreWriteFailure> },
}

fn join_failures(failures: &[StoreWriteFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
