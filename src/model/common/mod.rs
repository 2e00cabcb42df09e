//! Types shared between the database and API representations.

pub mod field_update;
pub mod identity;
