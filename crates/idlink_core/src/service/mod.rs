//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into resolution-level APIs.
//! - Keep callers decoupled from storage details.

pub mod identity_resolver;
pub mod projection;
