mod bson;
mod collection;
mod counter;
mod errors;
mod transaction;

pub use self::bson::Id;
pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use counter::{ensure_counter_exists, Counter, CANDIDATE_COUNTER_ID};
pub use errors::{is_duplicate_key_error, DUPLICATE_KEY};
pub use transaction::with_transaction;

use ::mongodb::{error::Error as DbError, Database};

/// Perform all idempotent setup the application relies on: indexes and
/// counters.
pub async fn prepare_database(db: &Database) -> Result<(), DbError> {
    ensure_indexes_exist(db).await?;
    ensure_counter_exists(&Coll::from_db(db), CANDIDATE_COUNTER_ID).await?;
    Ok(())
}
