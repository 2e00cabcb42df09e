use std::collections::HashMap;

use mongodb::{
    bson::{self, doc},
    options::SessionOptions,
    Client,
};
use rocket::futures::TryStreamExt;
use serde::Deserialize;

use crate::error::Result;
use crate::model::{
    db::{
        candidate::{creation_order, Candidate},
        vote::Vote,
    },
    mongodb::{Coll, Id},
};

/// One candidate and the number of votes currently recorded for it.
#[derive(Debug, Clone)]
pub struct CandidateTally {
    pub candidate: Candidate,
    pub votes: u64,
}

/// Output row of the vote counting pipeline.
#[derive(Debug, Deserialize)]
struct VoteCount {
    #[serde(rename = "_id")]
    candidate_id: Id,
    count: i64,
}

/// Count the votes for every candidate, in creation order.
///
/// Both reads happen at the same cluster time, so the result reflects a
/// single consistent state: every listed candidate exists, and every vote
/// that state holds for it is counted.
pub async fn tally(
    db_client: &Client,
    candidates: &Coll<Candidate>,
    votes: &Coll<Vote>,
) -> Result<Vec<CandidateTally>> {
    let options = SessionOptions::builder().snapshot(true).build();
    let mut session = db_client.start_session(options).await?;

    let listed: Vec<Candidate> = candidates
        .find_with_session(None, creation_order(), &mut session)
        .await?
        .stream(&mut session)
        .try_collect()
        .await?;

    let pipeline = [doc! {
        "$group": { "_id": "$candidate_id", "count": { "$sum": 1 } }
    }];
    let rows: Vec<bson::Document> = votes
        .aggregate_with_session(pipeline, None, &mut session)
        .await?
        .stream(&mut session)
        .try_collect()
        .await?;

    let mut counts = HashMap::with_capacity(rows.len());
    for row in rows {
        let row: VoteCount = bson::from_document(row)?;
        counts.insert(row.candidate_id, row.count);
    }

    Ok(listed
        .into_iter()
        .map(|candidate| CandidateTally {
            votes: counts
                .get(&candidate.id)
                .map_or(0, |&count| u64::try_from(count).unwrap_or(0)),
            candidate,
        })
        .collect())
}
