//! DB-compatible (e.g. de/serialisable) types, and the operations on them.
//!
//! The types in this module are serialised in an DB-friendly way, e.g.:
//!
//! - IDs are serialised in MongoDB's own format.
//! - Bookkeeping fields such as sequence numbers and revisions are kept.

pub mod candidate;
pub mod tally;
pub mod vote;
pub mod voter;
