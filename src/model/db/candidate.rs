use std::ops::Deref;
use std::time::Duration;

use mongodb::{
    bson::{doc, Document},
    options::FindOptions,
    Client,
};
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::AdminIdentity,
        candidate::{CandidatePatch, CandidateSpec},
    },
    common::field_update::FieldUpdate,
    db::vote::Vote,
    mongodb::{with_transaction, Coll, Counter, Id, CANDIDATE_COUNTER_ID},
};

/// Core candidate data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    /// Creation sequence number; candidates are listed in this order.
    pub seq: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Bumped by every write that touches this candidate, including vote
    /// casts, so that such writes conflict with a concurrent deletion.
    #[serde(default)]
    pub revision: u64,
}

impl CandidateCore {
    pub fn new(seq: u64, spec: CandidateSpec) -> Self {
        Self {
            seq,
            name: spec.name,
            description: spec.description,
            image_url: spec.image_url,
            revision: 0,
        }
    }
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

/// Parse a candidate ID supplied by a client. Malformed IDs cannot refer to
/// any candidate, so they are reported as not found.
pub fn parse_candidate_id(raw: &str) -> Result<Id> {
    raw.parse()
        .map_err(|_| Error::not_found(format!("Candidate '{raw}'")))
}

/// Sort order giving candidates in creation order.
pub fn creation_order() -> FindOptions {
    FindOptions::builder().sort(doc! { "seq": 1 }).build()
}

/// Create a new candidate and return its ID.
pub async fn add_candidate(
    admin: &AdminIdentity,
    new_candidates: &Coll<NewCandidate>,
    counters: &Coll<Counter>,
    spec: CandidateSpec,
) -> Result<Id> {
    if spec.name.is_empty() {
        return Err(Error::BadRequest(
            "Candidate name must not be empty".to_string(),
        ));
    }

    let seq = Counter::next(counters, CANDIDATE_COUNTER_ID).await?;
    let candidate = NewCandidate::new(seq, spec);
    let id: Id = new_candidates
        .insert_one(&candidate, None)
        .await?
        .inserted_id
        .as_object_id()
        .ok_or_else(|| Error::Internal("Inserted candidate has no ObjectId".to_string()))?
        .into();
    info!(
        "Admin {} added candidate {id} ('{}')",
        admin.identity(),
        candidate.name
    );
    Ok(id)
}

/// Build the update document for a patch, or reject it.
fn patch_to_update(patch: CandidatePatch) -> Result<Document> {
    let mut set = Document::new();
    let mut unset = Document::new();

    match patch.name {
        FieldUpdate::Unchanged => {}
        FieldUpdate::Set(name) if !name.is_empty() => {
            set.insert("name", name);
        }
        FieldUpdate::Set(_) | FieldUpdate::Cleared => {
            return Err(Error::BadRequest(
                "Candidate name must not be empty".to_string(),
            ))
        }
    }
    for (field, update) in [
        ("description", patch.description),
        ("image_url", patch.image_url),
    ] {
        match update {
            FieldUpdate::Unchanged => {}
            FieldUpdate::Cleared => {
                unset.insert(field, "");
            }
            FieldUpdate::Set(value) => {
                set.insert(field, value);
            }
        }
    }

    let mut update = doc! {
        "$inc": { "revision": 1_i64 },
    };
    if !set.is_empty() {
        update.insert("$set", set);
    }
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }
    Ok(update)
}

/// Apply a partial update to a candidate.
pub async fn update_candidate(
    admin: &AdminIdentity,
    candidates: &Coll<Candidate>,
    id: Id,
    patch: CandidatePatch,
) -> Result<()> {
    let update = patch_to_update(patch)?;
    let result = candidates.update_one(id.as_doc(), update, None).await?;
    if result.matched_count == 0 {
        return Err(Error::not_found(format!("Candidate '{id}'")));
    }
    info!("Admin {} updated candidate {id}", admin.identity());
    Ok(())
}

/// Delete a candidate together with every vote cast for it, atomically.
/// Returns the number of votes removed.
pub async fn delete_candidate(
    admin: &AdminIdentity,
    db_client: &Client,
    timeout: Duration,
    candidates: &Coll<Candidate>,
    votes: &Coll<Vote>,
    id: Id,
) -> Result<u64> {
    let removed = with_transaction(db_client, timeout, |session| {
        let candidates = candidates.clone();
        let votes = votes.clone();
        Box::pin(async move {
            let result = candidates
                .delete_one_with_session(id.as_doc(), None, session)
                .await?;
            if result.deleted_count == 0 {
                return Err(Error::not_found(format!("Candidate '{id}'")));
            }

            let result = votes
                .delete_many_with_session(doc! { "candidate_id": id }, None, session)
                .await?;
            Ok(result.deleted_count)
        })
    })
    .await?;
    info!(
        "Admin {} deleted candidate {id} and {removed} vote(s) for it",
        admin.identity()
    );
    Ok(removed)
}

/// All candidates, in creation order.
pub async fn list_candidates(candidates: &Coll<Candidate>) -> Result<Vec<Candidate>> {
    Ok(candidates
        .find(None, creation_order())
        .await?
        .try_collect()
        .await?)
}
