//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the contact store contract used by the resolver.
//! - Isolate SQLite query and transaction details from business orchestration.
//!
//! # Invariants
//! - Repository writes validate drafts before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `InvalidLink`) in
//!   addition to DB transport errors.

pub mod contact_repo;
pub mod store;
