use mongodb::error::Error as DbError;
use rocket::{
    http::{Status, StatusClass},
    response::{status, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::logging::RequestId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Deserialize(#[from] mongodb::bson::de::Error),
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Admin privileges required")]
    Forbidden,
    #[error("A voter profile is required: {0}")]
    ProfileRequired(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("A voter profile already exists for this identity")]
    AlreadyRegistered,
    #[error("Voter ID already registered: {0}")]
    DuplicateVoterId(String),
    #[error("A vote has already been cast by this identity")]
    AlreadyVoted,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// The name of this error kind, as reported to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Db(_) | Self::Deserialize(_) | Self::Internal(_) => "Internal",
            Self::Unauthenticated => "Unauthenticated",
            Self::Forbidden => "Forbidden",
            Self::ProfileRequired(_) => "ProfileRequired",
            Self::NotFound(_) => "NotFound",
            Self::AlreadyRegistered => "AlreadyRegistered",
            Self::DuplicateVoterId(_) => "DuplicateVoterId",
            Self::AlreadyVoted => "AlreadyVoted",
            Self::BadRequest(_) => "BadRequest",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) | Self::Deserialize(_) | Self::Internal(_) => {
                Status::InternalServerError
            }
            Self::Unauthenticated => Status::Unauthorized,
            Self::Forbidden | Self::ProfileRequired(_) => Status::Forbidden,
            Self::NotFound(_) => Status::NotFound,
            Self::AlreadyRegistered | Self::DuplicateVoterId(_) | Self::AlreadyVoted => {
                Status::Conflict
            }
            Self::BadRequest(_) => Status::BadRequest,
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let message = match err {
            // Don't leak database internals to clients.
            Error::Db(_) | Error::Deserialize(_) | Error::Internal(_) => {
                "Internal server error".to_string()
            }
            _ => err.to_string(),
        };
        Self {
            error: err.kind(),
            message,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let id = RequestId::of(req);
        let status = self.status();
        match status.class() {
            StatusClass::ServerError => error!("req{id} failed: {self}"),
            _ => warn!("req{id} rejected: {self}"),
        }
        status::Custom(status, Json(ErrorBody::from(&self))).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_share_a_status_but_not_a_kind() {
        let errors = [
            Error::AlreadyRegistered,
            Error::DuplicateVoterId("V-1".to_string()),
            Error::AlreadyVoted,
        ];
        for err in &errors {
            assert_eq!(err.status(), Status::Conflict);
        }
        let kinds = errors.iter().map(Error::kind).collect::<Vec<_>>();
        assert_eq!(kinds, ["AlreadyRegistered", "DuplicateVoterId", "AlreadyVoted"]);
    }

    #[test]
    fn auth_failures_are_distinguishable() {
        assert_eq!(Error::Unauthenticated.status(), Status::Unauthorized);
        assert_eq!(Error::Forbidden.status(), Status::Forbidden);
        let profile_required = Error::ProfileRequired("cast a vote".to_string());
        assert_eq!(profile_required.status(), Status::Forbidden);
        assert_ne!(profile_required.kind(), Error::Forbidden.kind());
    }

    #[test]
    fn body_carries_kind_and_message() {
        let body = ErrorBody::from(&Error::not_found("Candidate 'x'"));
        assert_eq!(body.error, "NotFound");
        assert_eq!(body.message, "Not found: Candidate 'x'");
    }
}
