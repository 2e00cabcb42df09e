use serde::{Deserialize, Serialize};

use crate::model::{
    api::id::ApiId, common::field_update::FieldUpdate, db::candidate::Candidate,
};

/// A new candidate, as submitted by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A partial update to a candidate. Fields left out of the request body are
/// not touched; fields given as `null` are cleared.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidatePatch {
    #[serde(default)]
    pub name: FieldUpdate<String>,
    #[serde(default)]
    pub description: FieldUpdate<String>,
    #[serde(default)]
    pub image_url: FieldUpdate<String>,
}

/// A candidate, as shown to anyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDesc {
    pub id: ApiId,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

impl From<Candidate> for CandidateDesc {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id.into(),
            name: candidate.candidate.name,
            description: candidate.candidate.description,
            image_url: candidate.candidate.image_url,
        }
    }
}
