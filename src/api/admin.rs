use mongodb::Client;
use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::{
    api::{
        auth::AuthGate,
        candidate::{CandidatePatch, CandidateSpec},
        id::ApiId,
    },
    db::{
        candidate::{self, Candidate, NewCandidate},
        vote::Vote,
        voter::VoterProfile,
    },
    mongodb::{Coll, Counter},
};
use crate::Config;

pub fn routes() -> Vec<Route> {
    routes![add_candidate, update_candidate, delete_candidate]
}

#[post("/candidates", data = "<spec>", format = "json")]
async fn add_candidate(
    gate: AuthGate,
    spec: Json<CandidateSpec>,
    voters: Coll<VoterProfile>,
    new_candidates: Coll<NewCandidate>,
    counters: Coll<Counter>,
) -> Result<Json<ApiId>> {
    let admin = gate.require_admin(&voters).await?;
    let id = candidate::add_candidate(&admin, &new_candidates, &counters, spec.0).await?;
    Ok(Json(id.into()))
}

#[patch("/candidates/<id>", data = "<patch>", format = "json")]
async fn update_candidate(
    gate: AuthGate,
    id: &str,
    patch: Json<CandidatePatch>,
    voters: Coll<VoterProfile>,
    candidates: Coll<Candidate>,
) -> Result<()> {
    let admin = gate.require_admin(&voters).await?;
    let id = candidate::parse_candidate_id(id)?;
    candidate::update_candidate(&admin, &candidates, id, patch.0).await
}

#[delete("/candidates/<id>")]
async fn delete_candidate(
    gate: AuthGate,
    id: &str,
    voters: Coll<VoterProfile>,
    candidates: Coll<Candidate>,
    votes: Coll<Vote>,
    db_client: &State<Client>,
    config: &State<Config>,
) -> Result<()> {
    let admin = gate.require_admin(&voters).await?;
    let id = candidate::parse_candidate_id(id)?;
    candidate::delete_candidate(
        &admin,
        db_client,
        config.transaction_timeout(),
        &candidates,
        &votes,
        id,
    )
    .await?;
    Ok(())
}
