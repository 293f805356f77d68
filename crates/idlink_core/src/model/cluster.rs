//! Canonical cluster view returned for every resolution.

use crate::model::contact::ContactId;
use serde::{Deserialize, Serialize};

/// Flattened view of one cluster: primary id plus every known identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterView {
    pub primary_contact_id: ContactId,
    /// Primary email first, then first occurrences in cluster order.
    pub emails: Vec<String>,
    /// Primary phone first, then first occurrences in cluster order.
    pub phone_numbers: Vec<String>,
    /// Every non-primary member, in cluster order.
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Wire response envelope `{ "contact": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ClusterView,
}

impl From<ClusterView> for IdentifyResponse {
    fn from(contact: ClusterView) -> Self {
        Self { contact }
    }
}
