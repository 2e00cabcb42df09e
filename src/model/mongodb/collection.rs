use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::db::{
    candidate::{Candidate, NewCandidate},
    vote::{NewVote, Vote},
    voter::{NewVoterProfile, VoterProfile},
};

use super::counter::Counter;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Voter profile collections
const VOTERS: &str = "voters";
impl MongoCollection for VoterProfile {
    const NAME: &'static str = VOTERS;
}
impl MongoCollection for NewVoterProfile {
    const NAME: &'static str = VOTERS;
}

// Candidate collections
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for NewCandidate {
    const NAME: &'static str = CANDIDATES;
}

// Vote collections
const VOTES: &str = "votes";
impl MongoCollection for Vote {
    const NAME: &'static str = VOTES;
}
impl MongoCollection for NewVote {
    const NAME: &'static str = VOTES;
}

// Counter collection
const COUNTERS: &str = "counters";
impl MongoCollection for Counter {
    const NAME: &'static str = COUNTERS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// The unique indexes are what enforce one profile per identity, globally
/// unique voter IDs, and one vote per identity, so the server must not run
/// without them.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Voter profile collection.
    let identity_index = IndexModel::builder()
        .keys(doc! {"identity": 1})
        .options(unique.clone())
        .build();
    let voter_id_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1})
        .options(unique.clone())
        .build();
    Coll::<VoterProfile>::from_db(db)
        .create_indexes([identity_index, voter_id_index], None)
        .await?;

    // Candidate collection.
    let seq_index = IndexModel::builder()
        .keys(doc! {"seq": 1})
        .options(unique.clone())
        .build();
    Coll::<Candidate>::from_db(db)
        .create_index(seq_index, None)
        .await?;

    // Vote collection.
    let voter_index = IndexModel::builder()
        .keys(doc! {"voter_identity": 1})
        .options(unique)
        .build();
    let candidate_index = IndexModel::builder()
        .keys(doc! {"candidate_id": 1})
        .build();
    Coll::<Vote>::from_db(db)
        .create_indexes([voter_index, candidate_index], None)
        .await?;

    Ok(())
}
