use serde::{Deserialize, Serialize};

use crate::model::{api::id::ApiId, db::tally::CandidateTally};

/// One row of the public tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    pub id: ApiId,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub vote_count: u64,
}

impl From<CandidateTally> for TallyEntry {
    fn from(tally: CandidateTally) -> Self {
        let candidate = tally.candidate.candidate;
        Self {
            id: tally.candidate.id.into(),
            name: candidate.name,
            description: candidate.description,
            image_url: candidate.image_url,
            vote_count: tally.votes,
        }
    }
}
