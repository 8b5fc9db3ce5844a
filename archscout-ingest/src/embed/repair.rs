use anyhow::Result;
use archscout_core::progress::TaskContext;
use archscout_core::util::has_nan;
use archscout_core::{EmbeddingModel, EmbeddingStore, StageOutcome};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub found: usize,
    pub repaired: usize,
    pub failed: usize,
}

/// Re-embeds every stored chunk whose vector contains NaN and updates it in place.
///
/// Chunks that still fail are counted and left as they are; valid chunks are never read back.
///
/// # Errors
///
/// Errors if the broken chunks cannot be listed.
#[tracing::instrument(skip_all, name = "embed.repair_nan")]
pub async fn repair_nan_embeddings(
    ctx: &TaskContext,
    model: &dyn EmbeddingModel,
    store: &dyn EmbeddingStore,
) -> Result<RepairReport> {
    let broken = store.chunks_with_nan().await?;
    let mut report = RepairReport {
        found: broken.len(),
        ..RepairReport::default()
    };
    ctx.set_total(broken.len());
    tracing::info!(found = report.found, "Repairing chunks with NaN embeddings");

    for chunk in broken {
        if ctx.should_stop() {
            break;
        }
        let key = chunk.key();

        let repaired = match model.embed(vec![chunk.text_content]).await {
            Ok(mut embeddings) => match embeddings.pop() {
                Some(embedding) if !has_nan(&embedding) => {
                    store.update_embedding(&key, embedding).await.map_err(|error| {
                        tracing::warn!(chunk_id = %key.chunk_id(), error = ?error, "Update failed");
                    })
                }
                _ => Err(()),
            },
            Err(error) => {
                tracing::warn!(chunk_id = %key.chunk_id(), error = %error, "Re-embedding failed");
                Err(())
            }
        };

        ctx.advance(1);
        if repaired.is_ok() {
            report.repaired += 1;
        } else {
            report.failed += 1;
            ctx.report_project_outcome(&key.project_id, StageOutcome::Failure);
        }
    }

    ctx.set_custom("repair", serde_json::to_value(report)?);
    tracing::info!(repaired = report.repaired, failed = report.failed, "Repair finished");
    Ok(report)
}
