use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use archscout_core::chunk::TextChunk;
use archscout_core::progress::TaskContext;
use archscout_core::util::has_nan;
use archscout_core::{
    ContentStore, EmbeddingModel, EmbeddingProvider, EmbeddingStore, ProjectId, StageOutcome,
};
use secrecy::SecretString;

use super::chunking::Chunker;
use super::key_pool::{KeyPool, KeyPoolError};
use super::throttle::Throttled;
use crate::workers::{RunSummary, for_each_project};

const DEFAULT_ATTEMPTS: usize = 5;

/// Embeds projects through a hosted api, one request per chunk.
///
/// Every project leases one API key for all of its requests. Chunks that fail are retried in
/// later passes; after the last pass the project fails but chunks already stored stay stored.
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    models: Arc<KeyPool<Arc<dyn EmbeddingModel>>>,
    contents: Arc<dyn ContentStore>,
    embeddings: Arc<dyn EmbeddingStore>,
    chunker: Chunker,
    attempts: usize,
}

impl RemoteEmbedder {
    /// Binds one throttled model per key.
    ///
    /// # Errors
    ///
    /// Errors if no keys are given.
    pub fn new(
        provider: &dyn EmbeddingProvider,
        api_keys: &[SecretString],
        min_request_interval: Duration,
        contents: Arc<dyn ContentStore>,
        embeddings: Arc<dyn EmbeddingStore>,
        chunker: Chunker,
    ) -> Result<Self, KeyPoolError> {
        let models = api_keys.iter().map(|key| {
            Arc::new(Throttled::new(provider.with_api_key(key), min_request_interval))
                as Arc<dyn EmbeddingModel>
        });

        Ok(Self {
            models: KeyPool::new(models)?,
            contents,
            embeddings,
            chunker,
            attempts: DEFAULT_ATTEMPTS,
        })
    }

    /// Passes over the failed chunks before a project is given up
    #[must_use]
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// One worker per key
    pub fn concurrency(&self) -> usize {
        self.models.size()
    }

    /// Embeds one project, reporting chunk progress to `ctx` when given.
    pub async fn embed_project(&self, id: &ProjectId, ctx: Option<&TaskContext>) -> StageOutcome {
        match self.try_embed_project(id, ctx).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(project_id = %id, error = ?error, "Failed to embed project");
                StageOutcome::Failure
            }
        }
    }

    async fn try_embed_project(&self, id: &ProjectId, ctx: Option<&TaskContext>) -> Result<StageOutcome> {
        let record = self
            .contents
            .get(id)
            .await?
            .context("Project is not in the content store")?;

        let chunks = self.chunker.chunk_record(id, &record);
        if chunks.is_empty() {
            tracing::warn!(project_id = %id, "Project has no text to embed");
            return Ok(StageOutcome::Failure);
        }

        let total = chunks.len();
        if let Some(ctx) = ctx {
            ctx.report_project_sub_total(id, total);
        }

        let model = self.models.lease().await?;
        let mut pending = chunks;
        let mut stored = 0;

        for attempt in 1..=self.attempts {
            let mut failed = Vec::new();
            for chunk in pending {
                match self.embed_chunk(model.as_ref(), &chunk).await {
                    Ok(()) => {
                        stored += 1;
                        if let Some(ctx) = ctx {
                            ctx.report_project_sub_curr(id, stored);
                        }
                    }
                    Err(error) => {
                        tracing::debug!(project_id = %id, chunk_id = %chunk.key.chunk_id(), attempt, error = %error, "Chunk failed");
                        failed.push(chunk);
                    }
                }
            }

            pending = failed;
            if pending.is_empty() {
                break;
            }
            tracing::warn!(project_id = %id, attempt, remaining = pending.len(), "Retrying failed chunks");
        }

        if pending.is_empty() {
            Ok(StageOutcome::Success)
        } else {
            tracing::error!(project_id = %id, stored, abandoned = pending.len(), "Giving up on chunks");
            Ok(StageOutcome::Failure)
        }
    }

    async fn embed_chunk(&self, model: &dyn EmbeddingModel, chunk: &TextChunk) -> Result<()> {
        let mut embeddings = model.embed(vec![chunk.text.clone()]).await?;
        let embedding = embeddings.pop().context("Model returned no embedding")?;
        if has_nan(&embedding) {
            anyhow::bail!("Embedding contains NaN");
        }

        self.embeddings
            .insert(chunk.clone().into_embedded(embedding))
            .await
    }

    #[tracing::instrument(skip_all, name = "embed.remote", fields(total = ids.len(), keys = self.concurrency()))]
    pub async fn embed_all(&self, ctx: &Arc<TaskContext>, ids: Vec<ProjectId>) -> RunSummary {
        let summary = for_each_project(ctx, ids, self.concurrency(), |id| {
            let embedder = self.clone();
            let ctx = Arc::clone(ctx);
            async move { embedder.embed_project(&id, Some(&ctx)).await }
        })
        .await;

        tracing::info!(
            success = summary.success,
            failure = summary.failure,
            "Remote embedding finished"
        );
        summary
    }
}
