//! Traits at the seams between the pipeline and the outside world.
//!
//! Stores and models are always used through `Arc<dyn ...>`, so the pipeline stages do not
//! care whether they talk to MongoDB, an in-memory map or a mock.
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use derive_builder::Builder;
use secrecy::SecretString;

use crate::chunk::{ChunkKey, EmbeddedChunk, SearchHit};
use crate::{Embedding, Embeddings, ModelError, ParsedRecord, ProjectId};

#[cfg(feature = "test-utils")]
use mockall::automock;

#[cfg_attr(feature = "test-utils", automock)]
#[async_trait]
/// Embeds a list of strings and returns its embeddings, in input order.
pub trait EmbeddingModel: Send + Sync + Debug {
    async fn embed(&self, input: Vec<String>) -> Result<Embeddings, ModelError>;
}

#[cfg_attr(feature = "test-utils", automock)]
/// Hands out embedding models bound to a single API key
pub trait EmbeddingProvider: Send + Sync + Debug {
    fn with_api_key(&self, api_key: &SecretString) -> Arc<dyn EmbeddingModel>;
}

/// A single-turn request to a chat model
#[derive(Debug, Clone, Default, Builder, PartialEq)]
#[builder(setter(into, strip_option))]
pub struct ChatRequest {
    #[builder(default)]
    pub system: Option<String>,
    pub prompt: String,
    #[builder(default)]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn builder() -> ChatRequestBuilder {
        ChatRequestBuilder::default()
    }
}

#[cfg_attr(feature = "test-utils", automock)]
#[async_trait]
/// Given a request, queries a chat model and returns the answer text
pub trait ChatModel: Send + Sync + Debug {
    async fn complete(&self, request: ChatRequest) -> Result<String, ModelError>;
}

#[cfg_attr(feature = "test-utils", automock)]
#[async_trait]
/// Parsed records by project id
pub trait ContentStore: Send + Sync + Debug {
    async fn contains(&self, id: &ProjectId) -> Result<bool>;

    async fn get(&self, id: &ProjectId) -> Result<Option<ParsedRecord>>;

    /// Inserts or overwrites the fields of the record for `id`
    async fn upsert(&self, id: &ProjectId, record: &ParsedRecord) -> Result<()>;
}

#[cfg_attr(feature = "test-utils", automock)]
#[async_trait]
/// Embedded chunks, one entry per chunk, searchable by vector
pub trait EmbeddingStore: Send + Sync + Debug {
    async fn has_project(&self, id: &ProjectId) -> Result<bool>;

    /// Removes every chunk of a project, returns how many were removed
    async fn delete_project(&self, id: &ProjectId) -> Result<u64>;

    async fn insert(&self, chunk: EmbeddedChunk) -> Result<()>;

    async fn insert_many(&self, chunks: Vec<EmbeddedChunk>) -> Result<()>;

    /// Chunks whose stored vector contains NaN
    async fn chunks_with_nan(&self) -> Result<Vec<EmbeddedChunk>>;

    async fn update_embedding(&self, key: &ChunkKey, embedding: Embedding) -> Result<()>;

    /// Nearest chunks to `query`, best first
    async fn search(&self, query: Embedding, top_k: usize) -> Result<Vec<SearchHit>>;
}

#[async_trait]
impl EmbeddingModel for Arc<dyn EmbeddingModel> {
    async fn embed(&self, input: Vec<String>) -> Result<Embeddings, ModelError> {
        self.as_ref().embed(input).await
    }
}

#[async_trait]
impl ChatModel for Arc<dyn ChatModel> {
    async fn complete(&self, request: ChatRequest) -> Result<String, ModelError> {
        self.as_ref().complete(request).await
    }
}
