use mongodb::Client;
use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::{
    api::{
        auth::AuthGate,
        voter::{ProfileRegistration, VoteRequest, VoterProfileDesc},
    },
    db::{
        candidate::Candidate,
        vote::{self, NewVote, Vote},
        voter::{self, NewVoterProfile, VoterProfile},
    },
    mongodb::Coll,
};
use crate::Config;

pub fn routes() -> Vec<Route> {
    routes![has_voted, get_profile, is_admin, register_profile, cast_vote]
}

#[get("/voter/voted")]
async fn has_voted(gate: AuthGate, votes: Coll<Vote>) -> Result<Json<bool>> {
    let voted = match gate.current_identity() {
        Some(identity) => vote::has_voted(&votes, identity).await?,
        None => false,
    };
    Ok(Json(voted))
}

#[get("/voter/profile")]
async fn get_profile(
    gate: AuthGate,
    voters: Coll<VoterProfile>,
) -> Result<Json<Option<VoterProfileDesc>>> {
    let profile = match gate.current_identity() {
        Some(identity) => voter::profile_by_identity(&voters, identity).await?,
        None => None,
    };
    Ok(Json(profile.map(VoterProfileDesc::from)))
}

#[get("/voter/admin")]
async fn is_admin(gate: AuthGate, voters: Coll<VoterProfile>) -> Result<Json<bool>> {
    let admin = match gate.current_identity() {
        Some(identity) => voter::is_admin(&voters, identity).await?,
        None => false,
    };
    Ok(Json(admin))
}

#[post("/voter/profile", data = "<registration>", format = "json")]
async fn register_profile(
    gate: AuthGate,
    registration: Json<ProfileRegistration>,
    voters: Coll<VoterProfile>,
    new_voters: Coll<NewVoterProfile>,
) -> Result<()> {
    let identity = gate.require_identity()?;
    voter::register_profile(&voters, &new_voters, identity, registration.0).await
}

#[post("/voter/vote", data = "<request>", format = "json")]
async fn cast_vote(
    gate: AuthGate,
    request: Json<VoteRequest>,
    voters: Coll<VoterProfile>,
    candidates: Coll<Candidate>,
    new_votes: Coll<NewVote>,
    db_client: &State<Client>,
    config: &State<Config>,
) -> Result<()> {
    let identity = gate.require_identity()?;
    vote::cast_vote(
        db_client,
        config.transaction_timeout(),
        &voters,
        &candidates,
        &new_votes,
        identity,
        &request.candidate_id,
    )
    .await?;
    Ok(())
}
