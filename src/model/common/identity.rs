use std::fmt::{Display, Formatter};

use mongodb::bson::Bson;
use serde::{Deserialize, Serialize};

/// The opaque, stable identity of an authenticated caller, as issued by the
/// external identity provider. This core never creates or destroys one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Identity> for Bson {
    fn from(identity: &Identity) -> Self {
        Bson::String(identity.0.clone())
    }
}
