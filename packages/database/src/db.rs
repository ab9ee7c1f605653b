//! Database connection utilities.

use mongodb::Client;
use mongodb::bson::doc;

use crate::DbError;
use crate::mongo::MongoCrimeStore;

/// Default connection string when `MONGODB_URI` is unset.
pub const DEFAULT_URI: &str = "mongodb://localhost:27017/";
/// Default database when `MONGODB_DATABASE` is unset.
pub const DEFAULT_DATABASE: &str = "police";
/// Default collection when `MONGODB_COLLECTION` is unset.
pub const DEFAULT_COLLECTION: &str = "crimes";

/// Where the crime collection lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoConfig {
    /// MongoDB connection string.
    pub uri: String,
    /// Database name.
    pub database: String,
    /// Collection holding the crime records.
    pub collection: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

impl MongoConfig {
    /// Reads `MONGODB_URI`, `MONGODB_DATABASE`, and `MONGODB_COLLECTION`,
    /// falling back to the defaults for unset variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            uri: lookup("MONGODB_URI").unwrap_or(defaults.uri),
            database: lookup("MONGODB_DATABASE").unwrap_or(defaults.database),
            collection: lookup("MONGODB_COLLECTION").unwrap_or(defaults.collection),
        }
    }
}

/// Connects to the crime collection described by `config`.
///
/// The driver connects lazily, so a `ping` is issued to surface an
/// unreachable server at startup instead of on the first request.
///
/// # Errors
///
/// Returns [`DbError`] if the connection string is invalid or the server
/// does not answer the ping.
pub async fn connect(config: &MongoConfig) -> Result<MongoCrimeStore, DbError> {
    let client = Client::with_uri_str(&config.uri).await?;
    let database = client.database(&config.database);
    database.run_command(doc! { "ping": 1 }, None).await?;

    log::debug!("Connected to {}.{}", config.database, config.collection);

    Ok(MongoCrimeStore::new(database.collection(&config.collection)))
}

/// Connects using [`MongoConfig::from_env`].
///
/// # Errors
///
/// Returns [`DbError`] if the connection fails.
pub async fn connect_from_env() -> Result<MongoCrimeStore, DbError> {
    connect(&MongoConfig::from_env()).await
}
