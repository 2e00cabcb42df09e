use serde::{Deserialize, Serialize};

use crate::model::db::voter::VoterProfile;

/// A request to register a voter profile for the calling identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRegistration {
    pub voter_id: String,
    pub official_name: String,
    pub phone_number: String,
}

/// A voter profile, as shown to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterProfileDesc {
    pub voter_id: String,
    pub official_name: String,
    pub phone_number: String,
    pub is_admin: bool,
}

impl From<VoterProfile> for VoterProfileDesc {
    fn from(profile: VoterProfile) -> Self {
        let profile = profile.profile;
        Self {
            voter_id: profile.voter_id,
            official_name: profile.official_name,
            phone_number: profile.phone_number,
            is_admin: profile.is_admin,
        }
    }
}

/// A request to vote for a candidate. The ID is kept as a string so that a
/// malformed ID is reported the same way as an unknown one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate_id: String,
}
