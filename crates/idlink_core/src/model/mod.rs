//! Domain model for identity reconciliation.
//!
//! # Responsibility
//! - Define the contact record, inbound fragments and the cluster view.
//!
//! # Invariants
//! - Every contact resolves to exactly one primary in at most one hop.
//! - Contacts are never deleted; only their link may change.

pub mod cluster;
pub mod contact;
pub mod fragment;
