mod gate;
mod token;

pub use gate::{AdminIdentity, AuthGate};
pub use token::{AuthToken, AUTH_TOKEN_COOKIE};
