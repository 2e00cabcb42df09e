#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;

pub use config::Config;

use config::{ConfigFairing, DatabaseFairing};
use logging::LoggerFairing;

/// Assemble the server: logging, configuration, the database connection,
/// and every route.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .mount("/", api::routes())
}

/// Connect to the database named by the `db_uri` config key.
#[cfg(test)]
pub(crate) async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .expect("`db_uri` not set");
    mongodb::Client::with_uri_str(&db_uri)
        .await
        .unwrap_or_else(|e| panic!("Could not connect to database at \"{db_uri}\": {e}"))
}

/// Name of a fresh database for a single test.
#[cfg(test)]
pub(crate) fn database() -> String {
    config::get_database_name()
}

/// Like [`build`], but using an existing database connection rather than
/// connecting through the [`DatabaseFairing`].
#[cfg(test)]
pub(crate) async fn rocket_for_db(client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    let db = client.database(db_name);
    model::mongodb::prepare_database(&db)
        .await
        .expect("Failed to prepare test database");
    rocket::build()
        .attach(ConfigFairing)
        .manage(client)
        .manage(db)
        .mount("/", api::routes())
}
