//! Contact domain model.
//!
//! # Responsibility
//! - Define the canonical contact record stored per submitted identity fragment.
//! - Encode the primary/secondary link as a closed two-variant tag.
//!
//! # Invariants
//! - `id` is assigned by storage and never reused.
//! - A contact carries at least one of `email` / `phone_number`.
//! - Only the secondary variant carries a `linked_id`, and it never links to itself.
//! - After creation only `link` (and `updated_at`) may change.
//!
//! # See also
//! - crate::service::identity_resolver

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage-assigned contact identifier (SQLite rowid).
pub type ContactId = i64;

/// Position of a contact inside its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "linkPrecedence", rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// Cluster root. Exactly one per cluster.
    Primary,
    /// Member linked directly to its cluster primary.
    Secondary {
        #[serde(rename = "linkedId")]
        linked_id: ContactId,
    },
}

impl LinkPrecedence {
    /// Returns whether this is the cluster root tag.
    pub fn is_primary(self) -> bool {
        matches!(self, Self::Primary)
    }

    /// Returns the linked primary for secondaries, `None` for primaries.
    pub fn linked_id(self) -> Option<ContactId> {
        match self {
            Self::Primary => None,
            Self::Secondary { linked_id } => Some(linked_id),
        }
    }

    /// Storage tag persisted in `contacts.link_precedence`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary { .. } => "secondary",
        }
    }
}

/// Canonical contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    #[serde(flatten)]
    pub link: LinkPrecedence,
    /// Epoch milliseconds. Non-decreasing in `id` order.
    pub created_at: i64,
    /// Epoch milliseconds of the last link change.
    pub updated_at: i64,
}

impl Contact {
    /// Returns whether this contact is a cluster primary.
    pub fn is_primary(&self) -> bool {
        self.link.is_primary()
    }

    /// Returns the id of the primary this contact resolves to.
    ///
    /// Primaries resolve to themselves; secondaries to their `linked_id`.
    pub fn primary_id(&self) -> ContactId {
        self.link.linked_id().unwrap_or(self.id)
    }

    /// Ordering key used wherever "oldest" is decided.
    pub fn age_key(&self) -> (i64, ContactId) {
        (self.created_at, self.id)
    }

    /// Returns whether both identifiers equal the given pair field by field.
    ///
    /// Absent equals absent only within the same field.
    pub fn has_identifiers(&self, email: Option<&str>, phone_number: Option<&str>) -> bool {
        self.email.as_deref() == email && self.phone_number.as_deref() == phone_number
    }

    /// Checks record-level invariants.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        if self.email.is_none() && self.phone_number.is_none() {
            return Err(ContactValidationError::MissingIdentifiers);
        }
        if self.link.linked_id() == Some(self.id) {
            return Err(ContactValidationError::SelfLink(self.id));
        }
        Ok(())
    }
}

/// Insert payload for a contact that storage has not seen yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link: LinkPrecedence,
}

impl NewContact {
    /// Draft for a fresh cluster root.
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            link: LinkPrecedence::Primary,
        }
    }

    /// Draft for a member of the cluster rooted at `linked_id`.
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        linked_id: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            link: LinkPrecedence::Secondary { linked_id },
        }
    }

    pub fn validate(&self) -> Result<(), ContactValidationError> {
        if self.email.is_none() && self.phone_number.is_none() {
            return Err(ContactValidationError::MissingIdentifiers);
        }
        Ok(())
    }
}

/// Record-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    /// Neither email nor phone number is set.
    MissingIdentifiers,
    /// Secondary contact points at itself.
    SelfLink(ContactId),
}

impl Display for ContactValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifiers => {
                write!(f, "contact must have at least one of email or phone number")
            }
            Self::SelfLink(id) => write!(f, "contact {id} cannot be linked to itself"),
        }
    }
}

impl Error for ContactValidationError {}

#[cfg(test)]
mod tests {
    use super::{Contact, ContactValidationError, LinkPrecedence};

    fn contact(id: i64, email: Option<&str>, phone: Option<&str>, link: LinkPrecedence) -> Contact {
        Contact {
            id,
            email: email.map(str::to_string),
            phone_number: phone.map(str::to_string),
            link,
            created_at: 1_000,
            updated_at: 1_000,
        }
    }

    #[test]
    fn primary_id_resolves_through_link() {
        let primary = contact(1, Some("a@x.io"), None, LinkPrecedence::Primary);
        let secondary = contact(
            2,
            None,
            Some("123"),
            LinkPrecedence::Secondary { linked_id: 1 },
        );
        assert_eq!(primary.primary_id(), 1);
        assert_eq!(secondary.primary_id(), 1);
    }

    #[test]
    fn has_identifiers_is_field_wise() {
        let row = contact(1, Some("a@x.io"), None, LinkPrecedence::Primary);
        assert!(row.has_identifiers(Some("a@x.io"), None));
        assert!(!row.has_identifiers(Some("a@x.io"), Some("123")));
        assert!(!row.has_identifiers(None, None));
    }

    #[test]
    fn validate_rejects_empty_and_self_linked_rows() {
        let empty = contact(1, None, None, LinkPrecedence::Primary);
        assert_eq!(
            empty.validate(),
            Err(ContactValidationError::MissingIdentifiers)
        );

        let looped = contact(
            3,
            Some("a@x.io"),
            None,
            LinkPrecedence::Secondary { linked_id: 3 },
        );
        assert_eq!(looped.validate(), Err(ContactValidationError::SelfLink(3)));
    }
}
