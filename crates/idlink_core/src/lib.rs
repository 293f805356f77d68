//! Core identity reconciliation for idlink.
//! This crate is the single source of truth for cluster invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ResolverOptions, StoreOptions};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::cluster::{ClusterView, IdentifyResponse};
pub use model::contact::{Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact};
pub use model::fragment::{FragmentValidationError, IdentifyRequest, IdentityFragment};
pub use repo::contact_repo::{ContactRepository, RepoError, RepoResult, SqliteContactRepository};
pub use repo::store::ContactStore;
pub use service::identity_resolver::{
    reconcile, IdentityResolver, Resolution, ResolutionOutcome, ResolveError, ResolveResult,
};
pub use service::projection::project;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
