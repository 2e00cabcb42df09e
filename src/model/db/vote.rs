use std::ops::Deref;
use std::time::Duration;

use mongodb::{bson::doc, Client};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::identity::Identity,
    db::{
        candidate::{parse_candidate_id, Candidate},
        voter::{self, VoterProfile},
    },
    mongodb::{is_duplicate_key_error, with_transaction, Coll, Id},
};

/// A single cast vote. At most one exists per identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCore {
    pub voter_identity: Identity,
    pub candidate_id: Id,
}

/// A vote without an ID.
pub type NewVote = VoteCore;

/// A vote from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: VoteCore,
}

impl Deref for Vote {
    type Target = VoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}

/// Record a vote by `identity` for the candidate with ID `candidate_id`.
///
/// Runs as one transaction: the caller must have a profile, the candidate
/// must exist, and the vote insert must not collide with an existing vote
/// from the same identity. Failures are reported in that order, so a caller
/// without a profile learns about that first even if the ID is malformed.
/// Touching the candidate's revision makes this write-conflict with a
/// concurrent deletion of that candidate, so a vote never outlives its
/// candidate.
pub async fn cast_vote(
    db_client: &Client,
    timeout: Duration,
    voters: &Coll<VoterProfile>,
    candidates: &Coll<Candidate>,
    new_votes: &Coll<NewVote>,
    identity: &Identity,
    candidate_id: &str,
) -> Result<Id> {
    let candidate_id = with_transaction(db_client, timeout, |session| {
        let voters = voters.clone();
        let candidates = candidates.clone();
        let new_votes = new_votes.clone();
        let identity = identity.clone();
        let candidate_id = candidate_id.to_string();
        Box::pin(async move {
            if voter::profile_by_identity_with_session(&voters, &identity, session)
                .await?
                .is_none()
            {
                return Err(Error::ProfileRequired(
                    "Register a voter profile before voting".to_string(),
                ));
            }

            let candidate_id = parse_candidate_id(&candidate_id)?;
            let touched = candidates
                .update_one_with_session(
                    candidate_id.as_doc(),
                    doc! { "$inc": { "revision": 1_i64 } },
                    None,
                    session,
                )
                .await?;
            if touched.matched_count == 0 {
                return Err(Error::not_found(format!("Candidate '{candidate_id}'")));
            }

            let vote = NewVote {
                voter_identity: identity,
                candidate_id,
            };
            match new_votes.insert_one_with_session(&vote, None, session).await {
                Ok(_) => Ok(candidate_id),
                Err(err) if is_duplicate_key_error(&err) => Err(Error::AlreadyVoted),
                Err(err) => Err(err.into()),
            }
        })
    })
    .await?;
    info!("Recorded a vote for candidate {candidate_id}");
    Ok(candidate_id)
}

/// Has `identity` cast a vote?
pub async fn has_voted(votes: &Coll<Vote>, identity: &Identity) -> Result<bool> {
    Ok(votes
        .find_one(doc! { "voter_identity": identity }, None)
        .await?
        .is_some())
}

#[cfg(test)]
mod tests {
    use mongodb::Database;
    use rocket::{futures::future::join_all, local::asynchronous::Client};

    use super::*;
    use crate::model::{
        api::{auth::AdminIdentity, candidate::CandidateSpec, voter::ProfileRegistration},
        db::{
            candidate::{add_candidate, delete_candidate, NewCandidate},
            voter::NewVoterProfile,
        },
        mongodb::Counter,
    };

    struct Fixture {
        mongo: mongodb::Client,
        voters: Coll<VoterProfile>,
        candidates: Coll<Candidate>,
        votes: Coll<Vote>,
        new_votes: Coll<NewVote>,
    }

    impl Fixture {
        fn new(client: &Client, db: &Database) -> Self {
            Self {
                mongo: client.rocket().state::<mongodb::Client>().unwrap().clone(),
                voters: Coll::from_db(db),
                candidates: Coll::from_db(db),
                votes: Coll::from_db(db),
                new_votes: Coll::from_db(db),
            }
        }

        async fn cast(&self, identity: &Identity, candidate_id: Id) -> Result<()> {
            self.cast_raw(identity, &candidate_id.to_string())
                .await
                .map(|recorded| assert_eq!(recorded, candidate_id))
        }

        async fn cast_raw(&self, identity: &Identity, candidate_id: &str) -> Result<Id> {
            cast_vote(
                &self.mongo,
                Duration::from_secs(60),
                &self.voters,
                &self.candidates,
                &self.new_votes,
                identity,
                candidate_id,
            )
            .await
        }
    }

    async fn alice(db: &Database) -> Id {
        add_candidate(
            &AdminIdentity::example(),
            &Coll::<NewCandidate>::from_db(db),
            &Coll::<Counter>::from_db(db),
            CandidateSpec::alice(),
        )
        .await
        .unwrap()
    }

    #[backend_test(voter)]
    async fn cast_once(client: Client, db: Database) {
        let fixture = Fixture::new(&client, &db);
        let candidate = alice(&db).await;
        let identity = Identity::example_voter();

        assert!(!has_voted(&fixture.votes, &identity).await.unwrap());
        fixture.cast(&identity, candidate).await.unwrap();
        assert!(has_voted(&fixture.votes, &identity).await.unwrap());

        let err = fixture.cast(&identity, candidate).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyVoted));
        assert_eq!(fixture.votes.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test]
    async fn profile_is_required(client: Client, db: Database) {
        let fixture = Fixture::new(&client, &db);
        let candidate = alice(&db).await;

        let err = fixture
            .cast(&Identity::example_voter(), candidate)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProfileRequired(_)));
        assert_eq!(fixture.votes.count_documents(None, None).await.unwrap(), 0);
    }

    #[backend_test(voter)]
    async fn unknown_candidate(client: Client, db: Database) {
        let fixture = Fixture::new(&client, &db);
        let err = fixture
            .cast(&Identity::example_voter(), Id::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!has_voted(&fixture.votes, &Identity::example_voter())
            .await
            .unwrap());
    }

    #[backend_test(voter)]
    async fn concurrent_casts_record_one_vote(client: Client, db: Database) {
        let fixture = Fixture::new(&client, &db);
        let candidate = alice(&db).await;
        let identity = Identity::example_voter();

        let outcomes =
            join_all((0..8).map(|_| fixture.cast(&identity, candidate))).await;
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(outcomes
            .iter()
            .all(|r| r.is_ok() || matches!(r, Err(Error::AlreadyVoted))));
        assert_eq!(fixture.votes.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test(voter)]
    async fn vote_racing_a_delete_leaves_nothing_behind(client: Client, db: Database) {
        let fixture = Fixture::new(&client, &db);
        let candidate = alice(&db).await;

        let (vote, delete) = rocket::futures::future::join(
            fixture.cast(&Identity::example_voter(), candidate),
            delete_candidate(
                &AdminIdentity::example(),
                &fixture.mongo,
                Duration::from_secs(60),
                &fixture.candidates,
                &fixture.votes,
                candidate,
            ),
        )
        .await;

        // Whichever order they commit in, the delete wins in the end.
        delete.unwrap();
        assert!(vote.is_ok() || matches!(vote, Err(Error::NotFound(_))));
        assert_eq!(fixture.votes.count_documents(None, None).await.unwrap(), 0);
        assert_eq!(
            fixture.candidates.count_documents(None, None).await.unwrap(),
            0
        );
    }

    #[backend_test]
    async fn profile_inserted_directly_counts(client: Client, db: Database) {
        let fixture = Fixture::new(&client, &db);
        let candidate = alice(&db).await;
        Coll::<NewVoterProfile>::from_db(&db)
            .insert_one(NewVoterProfile::example_admin(), None)
            .await
            .unwrap();

        // Admins may vote like anyone else.
        fixture
            .cast(&Identity::example_admin(), candidate)
            .await
            .unwrap();
        assert!(has_voted(&fixture.votes, &Identity::example_admin())
            .await
            .unwrap());
    }

    #[backend_test]
    async fn profile_is_checked_before_the_candidate_id(client: Client, db: Database) {
        let fixture = Fixture::new(&client, &db);
        for raw in ["42", "not-an-id"] {
            let err = fixture
                .cast_raw(&Identity::example_voter(), raw)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::ProfileRequired(_)));
        }
        let err = fixture
            .cast(&Identity::example_voter(), Id::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProfileRequired(_)));
    }

    #[backend_test(voter)]
    async fn malformed_candidate_id(client: Client, db: Database) {
        let fixture = Fixture::new(&client, &db);
        let err = fixture
            .cast_raw(&Identity::example_voter(), "42")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[backend_test]
    async fn many_voters_back_one_candidate_at_once(client: Client, db: Database) {
        const VOTERS: usize = 20;
        let fixture = Fixture::new(&client, &db);
        let candidate = alice(&db).await;

        let identities: Vec<Identity> = (0..VOTERS)
            .map(|n| Identity::new(format!("voter|crowd{n}")))
            .collect();
        let new_voters = Coll::<NewVoterProfile>::from_db(&db);
        for (n, identity) in identities.iter().enumerate() {
            let registration = ProfileRegistration {
                voter_id: format!("V-C{n:03}"),
                official_name: format!("Crowd Member {n}"),
                phone_number: format!("+4400000{n:05}"),
            };
            new_voters
                .insert_one(NewVoterProfile::new(identity.clone(), registration), None)
                .await
                .unwrap();
        }

        let outcomes =
            join_all(identities.iter().map(|identity| fixture.cast(identity, candidate))).await;
        for outcome in &outcomes {
            assert!(outcome.is_ok(), "vote failed: {outcome:?}");
        }
        assert_eq!(
            fixture
                .votes
                .count_documents(doc! { "candidate_id": candidate }, None)
                .await
                .unwrap(),
            VOTERS as u64
        );
    }
}
