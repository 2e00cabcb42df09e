//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Internal bookkeeping fields are omitted.

pub mod auth;
pub mod candidate;
pub mod id;
pub mod tally;
pub mod voter;
