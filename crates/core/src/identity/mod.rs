//! Identity reconciliation building blocks.
//!
//! - [`parser`]: directory record → canonical [`DirectoryIdentity`]
//! - [`differ`]: stored identities vs. canonical list → [`IdentityDiff`]
//! - [`store`]: the persistence interface
//! - [`hook`]: the `identity_create` override point

pub mod differ;
pub mod hook;
pub mod idn;
pub mod parser;
pub mod store;

pub use differ::{diff, IdentityDiff, NewIdentitySpec};
pub use hook::{
    DomainAllowlistHook, HookChain, HookResponse, IdentityCreateHook, IdentityProposal,
    PassThroughHook,
};
pub use parser::{is_address_field, parse, DirectoryIdentity};
pub use store::{Identity, IdentityStore, NewIdentity};
