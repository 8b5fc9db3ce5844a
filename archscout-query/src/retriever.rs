use std::sync::Arc;

use anyhow::{Context as _, Result};
use archscout_core::chunk::SearchHit;
use archscout_core::util::{has_nan, log_preview};
use archscout_core::{EmbeddingModel, EmbeddingStore};

/// Embeds a query and looks up the nearest chunks
#[derive(Debug, Clone)]
pub struct Retriever {
    model: Arc<dyn EmbeddingModel>,
    store: Arc<dyn EmbeddingStore>,
}

impl Retriever {
    pub fn new(model: Arc<dyn EmbeddingModel>, store: Arc<dyn EmbeddingStore>) -> Self {
        Self { model, store }
    }

    /// Best `top_k` chunks for `query`, best first.
    ///
    /// # Errors
    ///
    /// Errors if the query cannot be embedded or the store search fails.
    #[tracing::instrument(skip_all, name = "query.search", fields(top_k = top_k))]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        tracing::debug!(query = %log_preview(query, 100), "Searching");

        let embedding = self
            .model
            .embed(vec![query.to_string()])
            .await?
            .pop()
            .context("Model returned no embedding for the query")?;
        anyhow::ensure!(!has_nan(&embedding), "Query embedding contains NaN");

        self.store.search(embedding, top_k).await
    }
}
