//! Login-time identity reconciliation.
//!
//! The [`SyncOrchestrator`] runs one sequential reconciliation per login:
//!
//! 1. Load the user's current identities from the store.
//! 2. Connect a directory client for the login's mail domain.
//! 3. Look up `uid = username`; anything but exactly one record aborts.
//! 4. Parse the record into the canonical address list.
//! 5. Diff stored identities against it.
//! 6. Create missing identities (through the creation hook) and delete
//!    stale ones.
//!
//! Directory and record problems end the run as [`SyncOutcome::Aborted`]
//! with identities untouched. They never fail the login.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, MailDomain};
use crate::directory::{
    DirectoryConnector, DirectoryLookup, DirectoryRecord, LdapConnector, SearchQuery,
};
use crate::errors::{ConfigError, StoreWriteFailure, SyncError};
use crate::identity::{
    diff, parse, DirectoryIdentity, DomainAllowlistHook, Identity, IdentityCreateHook,
    IdentityDiff, IdentityProposal, IdentityStore, PassThroughHook,
};

// ---------------------------------------------------------------------------
// Reconciliation state machine
// ---------------------------------------------------------------------------

/// States of one reconciliation.
///
/// `Idle → LookupInFlight → {Aborted | RecordParsed → Diffed → Applying → Done}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    LookupInFlight,
    Aborted,
    RecordParsed,
    Diffed,
    Applying,
    Done,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::LookupInFlight => write!(f, "lookup_in_flight"),
            Self::Aborted => write!(f, "aborted"),
            Self::RecordParsed => write!(f, "record_parsed"),
            Self::Diffed => write!(f, "diffed"),
            Self::Applying => write!(f, "applying"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// A successful authentication, as seen by the reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginEvent {
    pub username: String,
    /// IMAP host the user logged in to; selects the mail domain.
    pub mail_host: String,
    pub user_id: i64,
    /// Opaque caller data, handed back untouched by
    /// [`SyncOrchestrator::login_after`].
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl LoginEvent {
    pub fn new(username: impl Into<String>, mail_host: impl Into<String>, user_id: i64) -> Self {
        Self {
            username: username.into(),
            mail_host: mail_host.into(),
            user_id,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Why a reconciliation stopped without touching identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// Connect, bind, search or readiness failure.
    DirectoryUnavailable { detail: String },
    /// The username matched zero or several directory records.
    NoAuthoritativeRecord { matches: usize },
    /// The record carried no usable address.
    EmptyCanonicalSet,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectoryUnavailable { detail } => write!(f, "directory unavailable: {detail}"),
            Self::NoAuthoritativeRecord { matches } => {
                write!(f, "expected exactly one directory record, found {matches}")
            }
            Self::EmptyCanonicalSet => write!(f, "directory record has no usable address"),
        }
    }
}

/// Counters from an applied reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub created: usize,
    pub deleted: usize,
    /// Creations skipped by the hook.
    pub vetoed: usize,
    /// Creations the hook rewrote to an address the user already had.
    pub existing: usize,
}

/// Result of [`SyncOrchestrator::on_login`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Aborted(AbortReason),
    Applied(SyncStats),
}

impl SyncOutcome {
    /// Terminal state of the run.
    pub fn state(&self) -> SyncState {
        match self {
            Self::Aborted(_) => SyncState::Aborted,
            Self::Applied(_) => SyncState::Done,
        }
    }
}

/// Result of [`SyncOrchestrator::plan`]: the work a login would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum SyncPlan {
    Aborted(AbortReason),
    Ready {
        identity: DirectoryIdentity,
        diff: IdentityDiff,
    },
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Reconciles a user's stored identities with the directory at login.
pub struct SyncOrchestrator<S> {
    store: S,
    connector: Box<dyn DirectoryConnector>,
    hook: Box<dyn IdentityCreateHook>,
    mail_domain: Option<MailDomain>,
}

impl<S: IdentityStore> SyncOrchestrator<S> {
    /// Orchestrator with a pass-through hook that uses the mail host as
    /// mail domain.
    pub fn new(store: S, connector: impl DirectoryConnector + 'static) -> Self {
        Self {
            store,
            connector: Box::new(connector),
            hook: Box::new(PassThroughHook),
            mail_domain: None,
        }
    }

    /// Wire the LDAP connector, the domain allow list and the mail domain
    /// mapping from `config`.
    pub fn from_config(store: S, config: &AppConfig) -> Result<Self, ConfigError> {
        let connector = LdapConnector::from_config(&config.directory).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "directory.addressbook".into(),
                detail: format!(
                    "address book '{}' is not configured",
                    config.directory.addressbook
                ),
            }
        })?;

        Ok(Self::new(store, connector)
            .with_hook(DomainAllowlistHook::new(&config.hooks.allowed_domains))
            .with_mail_domain(config.directory.mail_domain.clone()))
    }

    pub fn with_hook(mut self, hook: impl IdentityCreateHook + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn with_mail_domain(mut self, mapping: Option<MailDomain>) -> Self {
        self.mail_domain = mapping;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Reconcile `event.user_id`'s identities with the directory record of
    /// `event.username`.
    ///
    /// Store write failures do not stop the run; they are collected and
    /// returned as [`SyncError::StoreWrite`] once every operation was tried.
    pub async fn on_login(&self, event: &LoginEvent) -> Result<SyncOutcome, SyncError> {
        let (current, plan) = self.prepare(event).await?;
        let (identity, diff) = match plan {
            SyncPlan::Aborted(reason) => return Ok(SyncOutcome::Aborted(reason)),
            SyncPlan::Ready { identity, diff } => (identity, diff),
        };

        transition(event, SyncState::Applying);
        let mut stats = SyncStats::default();
        let mut failures = Vec::new();
        let mut known: HashSet<i64> = current.iter().map(|i| i.identity_id).collect();
        let mut claimed: HashSet<i64> = HashSet::new();

        for spec in &diff.to_create {
            let proposal = IdentityProposal {
                login: true,
                record: spec.for_user(event.user_id),
            };
            let response = self.hook.identity_create(proposal);
            if response.abort || response.record.email.is_empty() {
                debug!(email = %spec.email, "identity creation vetoed by hook");
                stats.vetoed += 1;
                continue;
            }

            match self.store.insert_identity(&response.record) {
                Ok(identity_id) if !known.insert(identity_id) => {
                    debug!(
                        identity_id,
                        email = %response.record.email,
                        "identity already stored"
                    );
                    claimed.insert(identity_id);
                    stats.existing += 1;
                }
                Ok(identity_id) => {
                    info!(
                        user_id = response.record.user_id,
                        identity_id,
                        email = %response.record.email,
                        standard = response.record.standard,
                        "created identity"
                    );
                    claimed.insert(identity_id);
                    stats.created += 1;
                }
                Err(e) => {
                    warn!(email = %response.record.email, error = %e, "failed to create identity");
                    failures.push(StoreWriteFailure {
                        operation: "insert",
                        email: response.record.email,
                        source: e,
                    });
                }
            }
        }

        for stale in &diff.to_delete {
            if claimed.contains(&stale.identity_id) {
                debug!(email = %stale.email, "keeping identity claimed by the hook");
                continue;
            }
            match self.store.delete_identity(stale.identity_id) {
                Ok(()) => {
                    info!(
                        user_id = stale.user_id,
                        identity_id = stale.identity_id,
                        email = %stale.email,
                        "deleted identity"
                    );
                    stats.deleted += 1;
                }
                Err(e) => {
                    warn!(email = %stale.email, error = %e, "failed to delete identity");
                    failures.push(StoreWriteFailure {
                        operation: "delete",
                        email: stale.email.clone(),
                        source: e,
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(SyncError::StoreWrite { failures });
        }

        transition(event, SyncState::Done);
        info!(
            username = %event.username,
            addresses = identity.email_list.len(),
            created = stats.created,
            deleted = stats.deleted,
            vetoed = stats.vetoed,
            existing = stats.existing,
            "identities synchronized"
        );
        Ok(SyncOutcome::Applied(stats))
    }

    /// Everything [`on_login`](Self::on_login) does up to the diff, without
    /// writing anything.
    pub async fn plan(&self, event: &LoginEvent) -> Result<SyncPlan, SyncError> {
        let (_, plan) = self.prepare(event).await?;
        Ok(plan)
    }

    /// The stored identities and the plan computed from them.
    async fn prepare(&self, event: &LoginEvent) -> Result<(Vec<Identity>, SyncPlan), SyncError> {
        transition(event, SyncState::Idle);
        let current = self
            .store
            .list_emails(event.user_id)
            .map_err(|source| SyncError::LoadIdentities {
                user_id: event.user_id,
                source,
            })?;

        transition(event, SyncState::LookupInFlight);
        let mail_domain = MailDomain::resolve(self.mail_domain.as_ref(), &event.mail_host);
        let record = match self.lookup(&event.username, &mail_domain).await {
            Ok(record) => record,
            Err(reason) => return Ok((current, abort(event, reason))),
        };

        let identity = parse(&record);
        transition(event, SyncState::RecordParsed);
        if identity.is_empty() {
            return Ok((current, abort(event, AbortReason::EmptyCanonicalSet)));
        }

        let diff = diff(&current, &identity);
        transition(event, SyncState::Diffed);
        debug!(
            to_create = diff.to_create.len(),
            to_delete = diff.to_delete.len(),
            "identity diff computed"
        );
        Ok((current, SyncPlan::Ready { identity, diff }))
    }

    /// Post-login hook: reconcile, log the result, and hand `event` back
    /// unchanged whatever happened.
    pub async fn login_after(&self, event: LoginEvent) -> LoginEvent {
        match self.on_login(&event).await {
            Ok(SyncOutcome::Applied(stats)) => {
                debug!(username = %event.username, ?stats, "login reconciliation applied");
            }
            Ok(SyncOutcome::Aborted(reason)) => {
                debug!(username = %event.username, %reason, "login reconciliation aborted");
            }
            Err(e) => {
                warn!(username = %event.username, error = %e, "login reconciliation failed");
            }
        }
        event
    }

    /// Fetch the single directory record for `username`.
    async fn lookup(
        &self,
        username: &str,
        mail_domain: &str,
    ) -> Result<DirectoryRecord, AbortReason> {
        let mut client = self
            .connector
            .connect(mail_domain)
            .await
            .map_err(|e| AbortReason::DirectoryUnavailable {
                detail: e.to_string(),
            })?;

        if !client.is_ready() {
            return Err(AbortReason::DirectoryUnavailable {
                detail: "client is not ready".into(),
            });
        }

        let searched = client.search(&SearchQuery::exact("uid", username)).await;
        if let Err(e) = client.close().await {
            warn!(mail_domain, error = %e, "failed to close directory client");
        }
        let results = searched.map_err(|e| AbortReason::DirectoryUnavailable {
            detail: e.to_string(),
        })?;

        let matches = results.len();
        results
            .into_single()
            .ok_or(AbortReason::NoAuthoritativeRecord { matches })
    }
}

fn transition(event: &LoginEvent, state: SyncState) {
    debug!(username = %event.username, user_id = event.user_id, %state, "reconciliation state");
}

fn abort(event: &LoginEvent, reason: AbortReason) -> SyncPlan {
    transition(event, SyncState::Aborted);
    info!(username = %event.username, %reason, "identity reconciliation aborted");
    SyncPlan::Aborted(reason)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
