//! Cluster-to-response projection.
//!
//! # Invariants
//! - The primary's identifiers are listed first.
//! - Identifiers keep first-occurrence order and appear once.
//! - Absent identifiers are skipped, never rendered as placeholders.

use crate::model::cluster::ClusterView;
use crate::model::contact::Contact;

/// Builds the canonical view of one cluster.
///
/// `secondaries` must already be in cluster order (oldest first).
pub fn project(primary: &Contact, secondaries: &[Contact]) -> ClusterView {
    let mut emails = Vec::new();
    let mut phone_numbers = Vec::new();

    for contact in std::iter::once(primary).chain(secondaries) {
        push_unique(&mut emails, contact.email.as_deref());
        push_unique(&mut phone_numbers, contact.phone_number.as_deref());
    }

    ClusterView {
        primary_contact_id: primary.id,
        emails,
        phone_numbers,
        secondary_contact_ids: secondaries.iter().map(|contact| contact.id).collect(),
    }
}

fn push_unique(values: &mut Vec<String>, candidate: Option<&str>) {
    if let Some(candidate) = candidate {
        if !values.iter().any(|value| value == candidate) {
            values.push(candidate.to_string());
        }
    }
}
