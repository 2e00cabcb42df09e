use std::time::Duration;

use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::mongodb::prepare_database;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default = "default_transaction_timeout")]
    transaction_timeout: u64,
    // secrets
    jwt_secret: String,
}

fn default_transaction_timeout() -> u64 {
    60
}

impl Config {
    /// How long a transaction that keeps hitting transient write conflicts
    /// is re-run before giving up. Always at least one second.
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout.max(1))
    }

    /// Secret key shared with the identity provider, used to verify
    /// session JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }
}

/// Extract a config section from Rocket's figment, reporting any problem in
/// Rocket's own format.
fn extract<T>(rocket: &Rocket<Build>, what: &str) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    rocket
        .figment()
        .extract::<T>()
        .map_err(|e| {
            error!("Invalid {what} configuration");
            rocket::config::pretty_print_error(e);
        })
        .ok()
}

/// Loads [`Config`] into managed state, failing ignition if it is invalid.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        match extract::<Config>(&rocket, "application") {
            Some(config) => Ok(rocket.manage(config)),
            None => Err(rocket),
        }
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secret: may embed credentials
    db_uri: String,
}

/// Connects to MongoDB, prepares indexes and counters, and manages both the
/// `Client` (needed for sessions) and the `Database`.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(db_config) = extract::<DbConfig>(&rocket, "database") else {
            return Err(rocket);
        };

        info!("Connecting to database...");
        let client = match MongoClient::with_uri_str(db_config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name());
        if let Err(e) = prepare_database(&db).await {
            error!("Failed to prepare database '{}': {e}", db.name());
            return Err(rocket);
        }
        info!("...database '{}' ready", db.name());

        Ok(rocket.manage(client).manage(db))
    }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
pub(crate) fn get_database_name() -> String {
    "ballot".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

#[cfg(test)]
mod tests {
    use rocket::figment::{providers::Serialized, Figment};

    use super::*;

    #[test]
    fn transaction_timeout_defaults_and_floors() {
        let figment = Figment::new().merge(Serialized::default("jwt_secret", "s3cret"));
        let config: Config = figment.extract().unwrap();
        assert_eq!(config.transaction_timeout(), Duration::from_secs(60));
        assert_eq!(config.jwt_secret(), b"s3cret");

        let figment = figment.merge(Serialized::default("transaction_timeout", 0));
        let config: Config = figment.extract().unwrap();
        assert_eq!(config.transaction_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn jwt_secret_is_required() {
        let figment = Figment::new().merge(Serialized::default("transaction_timeout", 3));
        assert!(figment.extract::<Config>().is_err());
    }
}
