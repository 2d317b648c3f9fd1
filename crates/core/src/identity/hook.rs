//! The `identity_create` override point.
//!
//! Every identity the orchestrator wants to create is first offered to an
//! [`IdentityCreateHook`], which may rewrite the record or veto it.

use tracing::debug;

use super::store::NewIdentity;

/// What the hook is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProposal {
    /// `true` when the creation happens during login reconciliation.
    pub login: bool,
    pub record: NewIdentity,
}

/// The hook's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResponse {
    /// Skip this creation.
    pub abort: bool,
    /// Record to persist, possibly rewritten.
    pub record: NewIdentity,
}

impl HookResponse {
    pub fn proceed(record: NewIdentity) -> Self {
        Self {
            abort: false,
            record,
        }
    }

    pub fn abort(record: NewIdentity) -> Self {
        Self {
            abort: true,
            record,
        }
    }
}

/// Policy applied to each proposed identity before it is stored.
pub trait IdentityCreateHook: Send + Sync {
    fn identity_create(&self, proposal: IdentityProposal) -> HookResponse;
}

impl<F> IdentityCreateHook for F
where
    F: Fn(IdentityProposal) -> HookResponse + Send + Sync,
{
    fn identity_create(&self, proposal: IdentityProposal) -> HookResponse {
        self(proposal)
    }
}

/// Accepts every proposal unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughHook;

impl IdentityCreateHook for PassThroughHook {
    fn identity_create(&self, proposal: IdentityProposal) -> HookResponse {
        HookResponse::proceed(proposal.record)
    }
}

/// Runs hooks in registration order, feeding each the previous record.
/// The first abort ends the chain.
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Box<dyn IdentityCreateHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: impl IdentityCreateHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl IdentityCreateHook for HookChain {
    fn identity_create(&self, proposal: IdentityProposal) -> HookResponse {
        let login = proposal.login;
        let mut record = proposal.record;
        for hook in &self.hooks {
            let response = hook.identity_create(IdentityProposal { login, record });
            if response.abort {
                return response;
            }
            record = response.record;
        }
        HookResponse::proceed(record)
    }
}

/// Vetoes addresses whose domain is not in the allow list.
///
/// Domains compare case-insensitively. An empty list allows everything.
#[derive(Debug, Clone, Default)]
pub struct DomainAllowlistHook {
    domains: Vec<String>,
}

impl DomainAllowlistHook {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    fn allows(&self, email: &str) -> bool {
        if self.domains.is_empty() {
            return true;
        }
        match email.rsplit_once('@') {
            Some((_, domain)) => {
                let domain = domain.to_ascii_lowercase();
                self.domains.iter().any(|allowed| *allowed == domain)
            }
            None => false,
        }
    }
}

impl IdentityCreateHook for DomainAllowlistHook {
    fn identity_create(&self, proposal: IdentityProposal) -> HookResponse {
        if self.allows(&proposal.record.email) {
            HookResponse::proceed(proposal.record)
        } else {
            debug!(email = %proposal.record.email, "domain not in allow list, vetoing identity");
            HookResponse::abort(proposal.record)
        }
    }
}
