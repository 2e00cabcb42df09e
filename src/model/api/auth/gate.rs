use std::convert::Infallible;

use rocket::{
    request::{FromRequest, Outcome},
    Request, State,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    common::identity::Identity,
    db::voter::{self, VoterProfile},
    mongodb::Coll,
};

use super::token::{AuthToken, AUTH_TOKEN_COOKIE};

/// The caller's session, as seen by this server.
///
/// As a request guard this never fails: a missing, malformed, forged or
/// expired token simply means there is no identity, and each endpoint
/// decides whether that is acceptable.
#[derive(Debug, Clone)]
pub struct AuthGate {
    identity: Option<Identity>,
}

/// Proof that the caller held the admin capability when it was checked.
/// Only [`AuthGate::require_admin`] can create one, and it is never cached
/// beyond the request that produced it.
#[derive(Debug)]
pub struct AdminIdentity(Identity);

impl AdminIdentity {
    pub fn identity(&self) -> &Identity {
        &self.0
    }
}

#[cfg(test)]
impl AdminIdentity {
    pub fn example() -> Self {
        Self(Identity::example_admin())
    }
}

impl AuthGate {
    pub fn current_identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn require_identity(&self) -> Result<&Identity> {
        self.current_identity().ok_or(Error::Unauthenticated)
    }

    /// Check that the caller has a voter profile with the admin flag set.
    pub async fn require_admin(&self, voters: &Coll<VoterProfile>) -> Result<AdminIdentity> {
        let identity = self.require_identity()?;
        if voter::is_admin(voters, identity).await? {
            Ok(AdminIdentity(identity.clone()))
        } else {
            Err(Error::Forbidden)
        }
    }

    /// Extract the raw session token: the cookie if present, otherwise an
    /// `Authorization: Bearer` header.
    fn raw_token<'r>(req: &'r Request<'_>) -> Option<&'r str> {
        req.cookies()
            .get(AUTH_TOKEN_COOKIE)
            .map(|cookie| cookie.value())
            .or_else(|| {
                req.headers()
                    .get_one("Authorization")
                    .and_then(|value| value.strip_prefix("Bearer "))
            })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthGate {
    type Error = Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        let identity = Self::raw_token(req).and_then(|raw| match AuthToken::decode(raw, config) {
            Ok(token) if !token.identity.as_str().is_empty() => Some(token.identity),
            Ok(_) => {
                debug!("Ignoring session token with an empty subject");
                None
            }
            Err(e) => {
                debug!("Ignoring invalid session token: {e}");
                None
            }
        });

        Outcome::Success(Self { identity })
    }
}
