use std::ops::Deref;

use mongodb::{
    bson::{doc, Document},
    ClientSession,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::voter::ProfileRegistration,
    common::identity::Identity,
    mongodb::{is_duplicate_key_error, Coll, Id},
};

/// Core voter profile data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterProfileCore {
    /// The identity that owns this profile. Unique.
    pub identity: Identity,
    /// Public voter ID. Unique across all profiles.
    pub voter_id: String,
    pub official_name: String,
    pub phone_number: String,
    /// Admin capability. Never set through the API; promotion is an
    /// out-of-band database operation.
    pub is_admin: bool,
}

impl VoterProfileCore {
    /// Create a new, non-admin profile owned by `identity`.
    pub fn new(identity: Identity, registration: ProfileRegistration) -> Self {
        Self {
            identity,
            voter_id: registration.voter_id,
            official_name: registration.official_name,
            phone_number: registration.phone_number,
            is_admin: false,
        }
    }
}

/// A voter profile without an ID.
pub type NewVoterProfile = VoterProfileCore;

/// A voter profile from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct VoterProfile {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub profile: VoterProfileCore,
}

impl Deref for VoterProfile {
    type Target = VoterProfileCore;

    fn deref(&self) -> &Self::Target {
        &self.profile
    }
}

/// Filter matching the profile owned by `identity`.
pub fn identity_filter(identity: &Identity) -> Document {
    doc! { "identity": identity }
}

/// Create a profile for `identity`.
///
/// Both uniqueness rules are enforced by unique indexes, so of any number of
/// concurrent registrations claiming the same identity or voter ID exactly
/// one insert succeeds. The losers are told which rule they broke.
pub async fn register_profile(
    voters: &Coll<VoterProfile>,
    new_voters: &Coll<NewVoterProfile>,
    identity: &Identity,
    registration: ProfileRegistration,
) -> Result<()> {
    if registration.voter_id.is_empty() {
        return Err(Error::BadRequest("Voter ID must not be empty".to_string()));
    }
    if profile_by_identity(voters, identity).await?.is_some() {
        return Err(Error::AlreadyRegistered);
    }

    let profile = NewVoterProfile::new(identity.clone(), registration);
    match new_voters.insert_one(&profile, None).await {
        Ok(_) => {
            info!("Registered voter ID '{}'", profile.voter_id);
            Ok(())
        }
        Err(err) if is_duplicate_key_error(&err) => {
            // Either we raced another registration for this identity, or the
            // voter ID is taken. The identity index is checked first.
            if profile_by_identity(voters, identity).await?.is_some() {
                Err(Error::AlreadyRegistered)
            } else {
                Err(Error::DuplicateVoterId(profile.voter_id))
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Get the profile owned by `identity`, if any.
pub async fn profile_by_identity(
    voters: &Coll<VoterProfile>,
    identity: &Identity,
) -> Result<Option<VoterProfile>> {
    Ok(voters.find_one(identity_filter(identity), None).await?)
}

/// As [`profile_by_identity`], but reading inside a transaction.
pub async fn profile_by_identity_with_session(
    voters: &Coll<VoterProfile>,
    identity: &Identity,
    session: &mut ClientSession,
) -> Result<Option<VoterProfile>> {
    Ok(voters
        .find_one_with_session(identity_filter(identity), None, session)
        .await?)
}

/// Does `identity` hold the admin capability? False if it has no profile.
pub async fn is_admin(voters: &Coll<VoterProfile>, identity: &Identity) -> Result<bool> {
    Ok(profile_by_identity(voters, identity)
        .await?
        .map_or(false, |profile| profile.is_admin))
}


#[cfg(test)]
mod tests {
    use rocket::futures::future::join;

    use super::*;

    #[backend_test]
    async fn register_and_fetch(voters: Coll<VoterProfile>, new_voters: Coll<NewVoterProfile>) {
        let identity = Identity::example_voter();
        assert!(profile_by_identity(&voters, &identity)
            .await
            .unwrap()
            .is_none());
        assert!(!is_admin(&voters, &identity).await.unwrap());

        register_profile(&voters, &new_voters, &identity, ProfileRegistration::example())
            .await
            .unwrap();

        let profile = profile_by_identity(&voters, &identity)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.profile, NewVoterProfile::example());
        assert!(!profile.is_admin);
        assert!(!is_admin(&voters, &identity).await.unwrap());
    }

    #[backend_test]
    async fn second_registration_is_rejected(
        voters: Coll<VoterProfile>,
        new_voters: Coll<NewVoterProfile>,
    ) {
        let identity = Identity::example_voter();
        register_profile(&voters, &new_voters, &identity, ProfileRegistration::example())
            .await
            .unwrap();

        // Same identity, even with a fresh voter ID.
        let result = register_profile(
            &voters,
            &new_voters,
            &identity,
            ProfileRegistration::example2(),
        )
        .await;
        assert!(matches!(result, Err(Error::AlreadyRegistered)));
        assert_eq!(new_voters.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test]
    async fn duplicate_voter_id_leaves_original_untouched(
        voters: Coll<VoterProfile>,
        new_voters: Coll<NewVoterProfile>,
    ) {
        register_profile(
            &voters,
            &new_voters,
            &Identity::example_voter(),
            ProfileRegistration::example(),
        )
        .await
        .unwrap();
        let original = profile_by_identity(&voters, &Identity::example_voter())
            .await
            .unwrap()
            .unwrap();

        // A different identity tries to claim the same voter ID.
        let mut registration = ProfileRegistration::example2();
        registration.voter_id = ProfileRegistration::example().voter_id;
        let result = register_profile(
            &voters,
            &new_voters,
            &Identity::example_voter2(),
            registration,
        )
        .await;
        assert!(matches!(result, Err(Error::DuplicateVoterId(_))));

        let after = profile_by_identity(&voters, &Identity::example_voter())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.id, original.id);
        assert_eq!(after.profile, original.profile);
        assert!(profile_by_identity(&voters, &Identity::example_voter2())
            .await
            .unwrap()
            .is_none());
    }

    #[backend_test]
    async fn empty_voter_id_is_rejected(
        voters: Coll<VoterProfile>,
        new_voters: Coll<NewVoterProfile>,
    ) {
        let mut registration = ProfileRegistration::example();
        registration.voter_id.clear();
        let result = register_profile(
            &voters,
            &new_voters,
            &Identity::example_voter(),
            registration,
        )
        .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
        assert_eq!(new_voters.count_documents(None, None).await.unwrap(), 0);
    }

    #[backend_test]
    async fn concurrent_registrations_for_one_voter_id(
        voters: Coll<VoterProfile>,
        new_voters: Coll<NewVoterProfile>,
    ) {
        let first = Identity::example_voter();
        let second = Identity::example_voter2();
        let mut registration = ProfileRegistration::example2();
        registration.voter_id = ProfileRegistration::example().voter_id;

        let (a, b) = join(
            register_profile(&voters, &new_voters, &first, ProfileRegistration::example()),
            register_profile(&voters, &new_voters, &second, registration),
        )
        .await;

        let outcomes = [a, b];
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        let duplicates = outcomes
            .iter()
            .filter(|r| matches!(r, Err(Error::DuplicateVoterId(_))))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(duplicates, 1);
        assert_eq!(new_voters.count_documents(None, None).await.unwrap(), 1);
    }
}
