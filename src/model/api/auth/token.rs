use chrono::{serde::ts_seconds, DateTime, Duration, Utc};
use jsonwebtoken::{errors::Error as JwtError, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::model::common::identity::Identity;

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// A session token, as issued by the identity provider, naming the
/// authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(rename = "sub")]
    pub identity: Identity,
}

/// Token claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    token: AuthToken,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    #[allow(clippy::missing_panics_doc)]
    /// Sign this token into a JWT that stays valid for `ttl`.
    pub fn encode(self, config: &Config, ttl: Duration) -> String {
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + ttl,
        };

        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .expect("JWT encoding is infallible with default settings")
    }

    /// Verify and decode a JWT. Fails if the signature is wrong or the token
    /// has expired.
    pub fn decode(token: &str, config: &Config) -> Result<Self, JwtError> {
        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )?
        .claims;
        Ok(claims.token)
    }
}

/// Stands in for the identity provider, which sets the session cookie in
/// production.
#[cfg(test)]
impl AuthToken {
    pub fn into_cookie(
        self,
        config: &Config,
        ttl: Duration,
    ) -> rocket::http::Cookie<'static> {
        use rocket::http::{Cookie, SameSite};

        let max_age = rocket::time::Duration::seconds(ttl.num_seconds());
        Cookie::build(AUTH_TOKEN_COOKIE, self.encode(config, ttl))
            .max_age(max_age)
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish()
    }
}
