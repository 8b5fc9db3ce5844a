//! MongoDB backed stores.
//!
//! One database per source holds two collections: parsed records keyed by project id, and one
//! document per embedded chunk. Vector search runs through an Atlas `$vectorSearch` index on the
//! chunk collection.
use anyhow::{Context as _, Result};
use archscout_core::{Settings, Source};
use derive_builder::Builder;

mod content;
mod embedding;

pub use content::MongoContentStore;
pub use embedding::MongoEmbeddingStore;

pub const CONTENT_COLLECTION: &str = "content_collection";
pub const EMBEDDING_COLLECTION: &str = "content_embedding";
const DEFAULT_VECTOR_INDEX: &str = "vector_index_text";

/// A connected client bound to one database.
///
/// Can be cloned with relative low cost as the client is shared.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(error = "anyhow::Error"))]
pub struct Mongo {
    client: mongodb::Client,
    database: String,
    #[builder(default = "DEFAULT_VECTOR_INDEX.to_string()")]
    vector_index: String,
}

impl Mongo {
    pub fn builder() -> MongoBuilder {
        MongoBuilder::default()
    }

    /// Connects to `uri`. The driver connects lazily, so this only fails on a malformed uri.
    ///
    /// # Errors
    ///
    /// Errors if the uri cannot be parsed.
    pub async fn connect(uri: &str, database: impl Into<String>) -> Result<Self> {
        let client = mongodb::Client::with_uri_str(uri)
            .await
            .context("Failed to connect to MongoDB")?;

        Self::builder().client(client).database(database).build()
    }

    /// Connects to the database settings name for `source`
    ///
    /// # Errors
    ///
    /// Errors if the uri cannot be parsed.
    pub async fn from_settings(settings: &Settings, source: Source) -> Result<Self> {
        let mut mongo = Self::connect(&settings.mongodb_uri, settings.database_name(source)).await?;
        mongo.vector_index.clone_from(&settings.vector_index_name);
        Ok(mongo)
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    fn database(&self) -> mongodb::Database {
        self.client.database(&self.database)
    }

    pub fn content_store(&self) -> MongoContentStore {
        MongoContentStore::new(self.database().collection(CONTENT_COLLECTION))
    }

    pub fn embedding_store(&self) -> MongoEmbeddingStore {
        MongoEmbeddingStore::new(
            self.database().collection(EMBEDDING_COLLECTION),
            &self.vector_index,
        )
    }

    /// Round trip to the server, used to surface connection problems early
    ///
    /// # Errors
    ///
    /// Errors if the server does not answer.
    pub async fn ping(&self) -> Result<()> {
        self.database()
            .run_command(mongodb::bson::doc! { "ping": 1 })
            .await
            .context("MongoDB did not answer")?;
        Ok(())
    }
}
