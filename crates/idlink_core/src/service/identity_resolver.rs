//! Identity resolution use-case service.
//!
//! # Responsibility
//! - Decide, per fragment, whether to create, extend, merge or leave a cluster.
//! - Apply that decision and re-read the final cluster in one unit of work.
//! - Retry units of work that lost a lock race.
//!
//! # Invariants
//! - "Oldest" always means smallest `(created_at, id)`.
//! - Merging demotes every non-surviving primary and re-points its
//!   secondaries to the survivor in the same transaction; no two-hop chain
//!   survives a commit.
//! - A fragment that equals an existing row field by field never adds a row.
//! - Invalid fragments are rejected before any store access.

use crate::config::ResolverOptions;
use crate::model::cluster::{ClusterView, IdentifyResponse};
use crate::model::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::model::fragment::{FragmentValidationError, IdentifyRequest, IdentityFragment};
use crate::repo::contact_repo::{ContactRepository, RepoError, RepoResult};
use crate::repo::store::ContactStore;
use crate::service::projection::project;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::thread;
use std::time::Instant;

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Errors surfaced by identity resolution.
#[derive(Debug)]
pub enum ResolveError {
    /// Fragment rejected before touching the store.
    InvalidInput(FragmentValidationError),
    /// Lock conflict or busy store; the whole resolution may be retried.
    TransientStoreFailure(RepoError),
    /// Storage engine failure that retrying will not fix.
    StoreUnavailable(RepoError),
    /// Lookup target does not exist.
    ContactNotFound(ContactId),
    /// Persisted rows violate cluster invariants.
    InconsistentState(RepoError),
}

impl ResolveError {
    /// Whether the caller may rerun the resolution from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStoreFailure(_))
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::TransientStoreFailure(_) => "transient_store_failure",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::ContactNotFound(_) => "contact_not_found",
            Self::InconsistentState(_) => "inconsistent_state",
        }
    }
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(err) => write!(f, "invalid input: {err}"),
            Self::TransientStoreFailure(err) => write!(f, "transient store failure: {err}"),
            Self::StoreUnavailable(err) => write!(f, "store unavailable: {err}"),
            Self::ContactNotFound(id) => write!(f, "contact not found: {id}"),
            Self::InconsistentState(err) => write!(f, "inconsistent contact state: {err}"),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidInput(err) => Some(err),
            Self::TransientStoreFailure(err) => Some(err),
            Self::StoreUnavailable(err) => Some(err),
            Self::ContactNotFound(_) => None,
            Self::InconsistentState(err) => Some(err),
        }
    }
}

impl From<FragmentValidationError> for ResolveError {
    fn from(value: FragmentValidationError) -> Self {
        Self::InvalidInput(value)
    }
}

impl From<RepoError> for ResolveError {
    fn from(value: RepoError) -> Self {
        if value.is_transient() {
            Self::TransientStoreFailure(value)
        } else if value.is_unavailable() {
            Self::StoreUnavailable(value)
        } else {
            Self::InconsistentState(value)
        }
    }
}

/// What a resolution changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// No row matched; a new primary was created.
    CreatedPrimary { id: ContactId },
    /// An exact match existed under a single primary.
    Unchanged,
    /// A new secondary was added under a single primary.
    Extended { created: ContactId },
    /// Several primaries collapsed into the oldest one.
    Merged {
        demoted: Vec<ContactId>,
        created: Option<ContactId>,
    },
}

impl ResolutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::CreatedPrimary { .. } => "created_primary",
            Self::Unchanged => "unchanged",
            Self::Extended { .. } => "extended",
            Self::Merged { .. } => "merged",
        }
    }
}

/// Final cluster state after a committed resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub primary: Contact,
    /// Every contact linked to `primary`, oldest first.
    pub secondaries: Vec<Contact>,
    pub outcome: ResolutionOutcome,
}

impl Resolution {
    pub fn view(&self) -> ClusterView {
        project(&self.primary, &self.secondaries)
    }
}

/// Resolver facade over an explicitly provided store.
pub struct IdentityResolver<'store> {
    store: &'store ContactStore,
    options: ResolverOptions,
}

impl<'store> IdentityResolver<'store> {
    pub fn new(store: &'store ContactStore, options: ResolverOptions) -> Self {
        Self { store, options }
    }

    /// Resolves one raw `(email, phone)` pair into its canonical cluster view.
    pub fn resolve(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> ResolveResult<IdentifyResponse> {
        let fragment = IdentityFragment::new(email, phone_number)?;
        let resolution = self.resolve_fragment(&fragment)?;
        Ok(IdentifyResponse::from(resolution.view()))
    }

    /// Resolves one wire request.
    pub fn identify(&self, request: &IdentifyRequest) -> ResolveResult<IdentifyResponse> {
        self.resolve(request.email.as_deref(), request.phone_number.as_deref())
    }

    /// Resolves a validated fragment inside one atomic unit of work.
    ///
    /// Transient store failures rerun the whole unit of work, up to
    /// `ResolverOptions::max_attempts` times in total.
    pub fn resolve_fragment(&self, fragment: &IdentityFragment) -> ResolveResult<Resolution> {
        let started_at = Instant::now();
        let max_attempts = self.options.effective_attempts();
        let mut attempt = 1;

        loop {
            match self
                .store
                .with_transaction(|repo| reconcile(repo, fragment))
            {
                Ok(resolution) => {
                    info!(
                        "event=identity_resolve module=service status=ok outcome={} attempt={} primary_id={} cluster_size={} duration_ms={}",
                        resolution.outcome.label(),
                        attempt,
                        resolution.primary.id,
                        resolution.secondaries.len() + 1,
                        started_at.elapsed().as_millis()
                    );
                    return Ok(resolution);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        "event=identity_resolve_retry module=service status=retry attempt={} max_attempts={} error={}",
                        attempt, max_attempts, err
                    );
                    thread::sleep(self.options.retry_backoff * attempt);
                    attempt += 1;
                }
                Err(err) => {
                    let err = ResolveError::from(err);
                    error!(
                        "event=identity_resolve module=service status=error attempt={} duration_ms={} error_code={} error={}",
                        attempt,
                        started_at.elapsed().as_millis(),
                        err.code(),
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Returns the view of the cluster that contains `contact_id`.
    pub fn cluster_of(&self, contact_id: ContactId) -> ResolveResult<ClusterView> {
        let started_at = Instant::now();
        let (primary, secondaries) = self
            .store
            .with_snapshot(|repo| {
                let contact = match repo.get_contact(contact_id)? {
                    Some(contact) => contact,
                    None => return Ok(None),
                };
                load_cluster(repo, contact.primary_id()).map(Some)
            })?
            .ok_or(ResolveError::ContactNotFound(contact_id))?;

        debug!(
            "event=cluster_lookup module=service status=ok primary_id={} cluster_size={} duration_ms={}",
            primary.id,
            secondaries.len() + 1,
            started_at.elapsed().as_millis()
        );
        Ok(project(&primary, &secondaries))
    }
}

/// Core reconciliation step. Must run inside one atomic unit of work.
pub fn reconcile<R>(repo: &R, fragment: &IdentityFragment) -> RepoResult<Resolution>
where
    R: ContactRepository + ?Sized,
{
    let email = fragment.email().map(str::to_string);
    let phone_number = fragment.phone_number().map(str::to_string);

    let matches = repo.find_matching(fragment.email(), fragment.phone_number())?;
    if matches.is_empty() {
        let primary = repo.create_contact(&NewContact::primary(email, phone_number))?;
        return Ok(Resolution {
            outcome: ResolutionOutcome::CreatedPrimary { id: primary.id },
            primary,
            secondaries: Vec::new(),
        });
    }

    let exact_match = matches
        .iter()
        .any(|contact| contact.has_identifiers(fragment.email(), fragment.phone_number()));
    let primaries = distinct_primaries(repo, &matches)?;
    let (survivor, newer) = primaries.split_first().ok_or_else(|| {
        RepoError::InvalidData("matched contacts resolve to no primary".to_string())
    })?;

    let mut demoted = Vec::with_capacity(newer.len());
    for primary in newer {
        // Flatten first so the demoted contact never heads a chain.
        repo.relink_secondaries(primary.id, survivor.id)?;
        repo.update_link(
            primary.id,
            LinkPrecedence::Secondary {
                linked_id: survivor.id,
            },
        )?;
        demoted.push(primary.id);
    }

    let created = if exact_match {
        None
    } else {
        let draft = NewContact::secondary(email, phone_number, survivor.id);
        Some(repo.create_contact(&draft)?.id)
    };

    let outcome = match (demoted.is_empty(), created) {
        (false, created) => ResolutionOutcome::Merged { demoted, created },
        (true, Some(created)) => ResolutionOutcome::Extended { created },
        (true, None) => ResolutionOutcome::Unchanged,
    };

    let (primary, secondaries) = load_cluster(repo, survivor.id)?;
    Ok(Resolution {
        primary,
        secondaries,
        outcome,
    })
}

/// Primaries reachable from `matches`, oldest first.
fn distinct_primaries<R>(repo: &R, matches: &[Contact]) -> RepoResult<Vec<Contact>>
where
    R: ContactRepository + ?Sized,
{
    let mut primaries: BTreeMap<ContactId, Contact> = BTreeMap::new();

    for contact in matches {
        let primary_id = contact.primary_id();
        if primaries.contains_key(&primary_id) {
            continue;
        }

        let primary = match matches.iter().find(|candidate| candidate.id == primary_id) {
            Some(found) => found.clone(),
            None => repo
                .get_contact(primary_id)?
                .ok_or(RepoError::NotFound(primary_id))?,
        };
        if !primary.is_primary() {
            return Err(RepoError::InvalidLink {
                id: contact.id,
                linked_id: primary_id,
                reason: "secondary is linked to another secondary",
            });
        }
        primaries.insert(primary_id, primary);
    }

    let mut primaries: Vec<Contact> = primaries.into_values().collect();
    primaries.sort_by_key(Contact::age_key);
    Ok(primaries)
}

/// Splits the stored cluster of `primary_id` into primary and secondaries.
fn load_cluster<R>(repo: &R, primary_id: ContactId) -> RepoResult<(Contact, Vec<Contact>)>
where
    R: ContactRepository + ?Sized,
{
    let mut members = repo.find_cluster(primary_id)?;
    let position = members
        .iter()
        .position(|contact| contact.id == primary_id)
        .ok_or(RepoError::NotFound(primary_id))?;
    let primary = members.remove(position);
    if !primary.is_primary() {
        return Err(RepoError::InvalidLink {
            id: primary.id,
            linked_id: primary.primary_id(),
            reason: "cluster root is not a primary",
        });
    }

    Ok((primary, members))
}
