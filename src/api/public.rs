use mongodb::Client;
use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::{
    api::{candidate::CandidateDesc, tally::TallyEntry},
    db::{
        candidate::{self, Candidate},
        tally,
        vote::Vote,
    },
    mongodb::Coll,
};

pub fn routes() -> Vec<Route> {
    routes![list_candidates, get_tally]
}

#[get("/candidates")]
async fn list_candidates(candidates: Coll<Candidate>) -> Result<Json<Vec<CandidateDesc>>> {
    let listed = candidate::list_candidates(&candidates).await?;
    Ok(Json(listed.into_iter().map(CandidateDesc::from).collect()))
}

#[get("/tally")]
async fn get_tally(
    db_client: &State<Client>,
    candidates: Coll<Candidate>,
    votes: Coll<Vote>,
) -> Result<Json<Vec<TallyEntry>>> {
    let counts = tally::tally(db_client, &candidates, &votes).await?;
    Ok(Json(counts.into_iter().map(TallyEntry::from).collect()))
}

#[cfg(test)]
mod tests {
    use rocket::local::asynchronous::Client;

    use super::*;
    use crate::api::test_support::ok_json;

    #[backend_test]
    async fn empty_election(client: Client) {
        let response = client.get(uri!(list_candidates)).dispatch().await;
        let listed: Vec<CandidateDesc> = ok_json(response).await;
        assert!(listed.is_empty());

        let response = client.get(uri!(get_tally)).dispatch().await;
        let counts: Vec<TallyEntry> = ok_json(response).await;
        assert!(counts.is_empty());
    }
}
