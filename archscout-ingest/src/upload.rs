//! Pushes parsed records into the content store.
use std::sync::Arc;

use anyhow::Result;
use archscout_core::progress::TaskContext;
use archscout_core::{ContentStore, ParsedRecord, ProjectId, ProjectLayout, StageOutcome};

use crate::workers::{RunSummary, for_each_project};

#[derive(Debug, Clone)]
pub struct Uploader {
    layout: ProjectLayout,
    store: Arc<dyn ContentStore>,
}

impl Uploader {
    pub fn new(layout: ProjectLayout, store: Arc<dyn ContentStore>) -> Self {
        Self { layout, store }
    }

    /// Uploads one record.
    ///
    /// With `skip_existing`, projects already in the store are `Complete`. A missing record is a
    /// `Failure`; one that is not valid json is deleted so the next parse recreates it, and is a
    /// `Failure` too. Valid json of the wrong shape is a `Failure` and stays on disk.
    pub async fn upload(&self, id: &ProjectId, skip_existing: bool) -> StageOutcome {
        match self.try_upload(id, skip_existing).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(project_id = %id, error = ?error, "Failed to upload record");
                StageOutcome::Failure
            }
        }
    }

    async fn try_upload(&self, id: &ProjectId, skip_existing: bool) -> Result<StageOutcome> {
        if skip_existing && self.store.contains(id).await? {
            return Ok(StageOutcome::Complete);
        }

        let path = self.layout.record_path(id);
        let Ok(raw) = fs_err::tokio::read_to_string(&path).await else {
            tracing::warn!(project_id = %id, "No content.json to upload");
            return Ok(StageOutcome::Failure);
        };

        let record: ParsedRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(error) if error.is_syntax() || error.is_eof() => {
                tracing::error!(project_id = %id, %error, "Corrupt content.json, removing it");
                fs_err::tokio::remove_file(&path).await?;
                return Ok(StageOutcome::Failure);
            }
            Err(error) => {
                tracing::error!(project_id = %id, %error, "content.json has an unexpected shape");
                return Ok(StageOutcome::Failure);
            }
        };

        self.store.upsert(id, &record).await?;
        Ok(StageOutcome::Success)
    }

    #[tracing::instrument(skip_all, name = "upload.upload_all", fields(total = ids.len()))]
    pub async fn upload_all(
        &self,
        ctx: &TaskContext,
        ids: Vec<ProjectId>,
        skip_existing: bool,
        concurrency: usize,
    ) -> RunSummary {
        let summary = for_each_project(ctx, ids, concurrency, |id| {
            let uploader = self.clone();
            async move { uploader.upload(&id, skip_existing).await }
        })
        .await;

        tracing::info!(
            uploaded = summary.success,
            skipped = summary.complete,
            failure = summary.failure,
            "Upload finished"
        );
        summary
    }
}
