//! Connection acquisition is the caller's responsibility; the adapter only
//! ever borrows a handle (spec.md §5 "shared resource policy"). This struct
//! is a thin convenience for assembling a `mongodb::Client`, analogous to
//! how `r2e-data-sqlx::HasPool` separates "how to get a pool" from "how to
//! use it".

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MongoConnectOptions {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub connect_timeout: Duration,
    pub server_selection_timeout: Duration,
}

impl MongoConnectOptions {
    pub fn new(uri: impl Into<String>, database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            collection: collection.into(),
            connect_timeout: Duration::from_secs(10),
            server_selection_timeout: Duration::from_secs(10),
        }
    }

    pub async fn connect(&self) -> Result<mongodb::Client, mongodb::error::Error> {
        let mut options = mongodb::options::ClientOptions::parse(&self.uri).await?;
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.server_selection_timeout);
        mongodb::Client::with_options(options)
    }

    pub fn collection(&self, client: &mongodb::Client) -> mongodb::Collection<bson::Document> {
        client.database(&self.database).collection(&self.collection)
    }
}
