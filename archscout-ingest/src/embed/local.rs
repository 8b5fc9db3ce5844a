use std::sync::Arc;

use anyhow::{Context as _, Result};
use archscout_core::chunk::EmbeddedChunk;
use archscout_core::progress::TaskContext;
use archscout_core::util::has_nan;
use archscout_core::{ContentStore, EmbeddingModel, EmbeddingStore, ProjectId, StageOutcome};
use tokio::sync::mpsc;

use super::chunking::Chunker;
use crate::workers::RunSummary;

/// Projects waiting to be written, beyond this the producer waits
const CHANNEL_CAPACITY: usize = 100;

/// Embeds projects with a locally hosted model.
///
/// A producer embeds one project at a time and hands the finished documents to a consumer
/// that writes them in bulk. A project with any NaN in its vectors is dropped as a whole.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    model: Arc<dyn EmbeddingModel>,
    contents: Arc<dyn ContentStore>,
    embeddings: Arc<dyn EmbeddingStore>,
    chunker: Chunker,
}

impl LocalEmbedder {
    pub fn new(
        model: Arc<dyn EmbeddingModel>,
        contents: Arc<dyn ContentStore>,
        embeddings: Arc<dyn EmbeddingStore>,
        chunker: Chunker,
    ) -> Self {
        Self {
            model,
            contents,
            embeddings,
            chunker,
        }
    }

    /// Chunks and embeds one project without storing anything
    ///
    /// # Errors
    ///
    /// Errors if the project has no text, the model fails, or any vector contains NaN.
    pub async fn embed_documents(&self, id: &ProjectId) -> Result<Vec<EmbeddedChunk>> {
        let record = self
            .contents
            .get(id)
            .await?
            .context("Project is not in the content store")?;

        let chunks = self.chunker.chunk_record(id, &record);
        anyhow::ensure!(!chunks.is_empty(), "Project has no text to embed");

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.model.embed(texts).await?;
        anyhow::ensure!(
            embeddings.len() == chunks.len(),
            "Model returned {} embeddings for {} chunks",
            embeddings.len(),
            chunks.len()
        );
        anyhow::ensure!(
            !embeddings.iter().any(|embedding| has_nan(embedding)),
            "Embedding contains NaN"
        );

        Ok(chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| chunk.into_embedded(embedding).with_chunk_id())
            .collect())
    }

    #[tracing::instrument(skip_all, name = "embed.local", fields(total = ids.len()))]
    pub async fn embed_all(&self, ctx: &TaskContext, ids: Vec<ProjectId>) -> RunSummary {
        let total = ids.len();
        ctx.set_total(total);
        ctx.set_curr(0);

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (produced, consumed) = tokio::join!(
            self.produce(ctx, ids, tx),
            self.consume(ctx, rx)
        );

        let mut summary = produced;
        summary.success += consumed.success;
        summary.failure += consumed.failure;
        summary.not_started = total - summary.processed();

        tracing::info!(
            success = summary.success,
            failure = summary.failure,
            not_started = summary.not_started,
            "Local embedding finished"
        );
        summary
    }

    /// Embeds projects in order, failures are reported here and never reach the consumer
    async fn produce(
        &self,
        ctx: &TaskContext,
        ids: Vec<ProjectId>,
        tx: mpsc::Sender<(ProjectId, Vec<EmbeddedChunk>)>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        for id in ids {
            if ctx.should_stop() {
                break;
            }
            ctx.report_project_start(&id);

            match self.embed_documents(&id).await {
                Ok(documents) => {
                    if tx.send((id, documents)).await.is_err() {
                        tracing::error!("Writer stopped, no more projects are embedded");
                        break;
                    }
                }
                Err(error) => {
                    tracing::error!(project_id = %id, error = ?error, "Failed to embed project");
                    ctx.report_project_outcome(&id, StageOutcome::Failure);
                    ctx.advance(1);
                    summary.record(StageOutcome::Failure);
                }
            }
        }
        summary
    }

    async fn consume(
        &self,
        ctx: &TaskContext,
        mut rx: mpsc::Receiver<(ProjectId, Vec<EmbeddedChunk>)>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        while let Some((id, documents)) = rx.recv().await {
            let count = documents.len();
            let outcome = match self.embeddings.insert_many(documents).await {
                Ok(()) => {
                    tracing::debug!(project_id = %id, count, "Stored chunks");
                    StageOutcome::Success
                }
                Err(error) => {
                    tracing::error!(project_id = %id, error = ?error, "Failed to store chunks");
                    StageOutcome::Failure
                }
            };
            ctx.report_project_outcome(&id, outcome);
            ctx.advance(1);
            summary.record(outcome);
        }
        summary
    }
}
