//! Builds work queues from what is on disk and in the database.
use std::collections::HashSet;

use anyhow::Result;
use archscout_core::progress::TaskContext;
use archscout_core::{
    ContentStore, EmbeddingStore, InvalidIds, ParsedRecord, ProjectId, ProjectLayout,
};
use serde::Serialize;

/// Widest id range a single scan accepts
pub const MAX_ID_RANGE: u64 = 5_000_000;

/// What the scan looks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMode {
    /// Project folders without raw content
    MissingRawContent,
    /// Projects with raw content waiting for a parse. With `skip_parsed`, projects that already
    /// have a record are left out.
    PendingParse { skip_parsed: bool },
    /// Projects whose gallery lists more images than exist on disk
    PendingImages { size: String },
    /// Inclusive id range without existing folders and known invalid ids, descending when
    /// `start > end`. At most [`MAX_ID_RANGE`] ids.
    IdRange { start: u64, end: u64 },
}

/// The queue plus counters that explain it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub queue: Vec<ProjectId>,
    pub scanned: usize,
    /// Projects without `content.json`
    pub missing_record: usize,
    /// Projects without raw content
    pub missing_raw_content: usize,
    /// Projects whose record or database entry could not be used
    pub unreadable: usize,
}

impl ScanResult {
    fn report(&self, ctx: &TaskContext) {
        ctx.set_custom("num_projects_with_no_content_json", self.missing_record);
        ctx.set_custom("num_projects_with_no_raw_content", self.missing_raw_content);
        ctx.set_custom("num_unreadable_projects", self.unreadable);
        ctx.report_message(format!(
            "Scanned {} projects, {} queued",
            self.scanned,
            self.queue.len()
        ));
    }
}

#[derive(Debug, Clone)]
pub struct Scanner {
    layout: ProjectLayout,
    invalid_ids: Option<InvalidIds>,
}

impl Scanner {
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            layout,
            invalid_ids: None,
        }
    }

    /// Ids in this set are never queued by an [`ScanMode::IdRange`] scan
    #[must_use]
    pub fn with_invalid_ids(mut self, invalid_ids: InvalidIds) -> Self {
        self.invalid_ids = Some(invalid_ids);
        self
    }

    /// Scans the projects folder. Stops early, with a partial queue, when `ctx` is cancelled.
    ///
    /// # Errors
    ///
    /// Errors if the projects folder cannot be listed.
    #[tracing::instrument(skip_all, name = "scan.scan", fields(mode = ?mode))]
    pub async fn scan(&self, ctx: &TaskContext, mode: &ScanMode) -> Result<ScanResult> {
        let result = match mode {
            ScanMode::IdRange { start, end } => self.id_range(ctx, *start, *end).await?,
            _ => self.scan_folders(ctx, mode).await?,
        };

        result.report(ctx);
        tracing::info!(
            scanned = result.scanned,
            queued = result.queue.len(),
            missing_record = result.missing_record,
            missing_raw_content = result.missing_raw_content,
            "Scan finished"
        );
        Ok(result)
    }

    async fn scan_folders(&self, ctx: &TaskContext, mode: &ScanMode) -> Result<ScanResult> {
        let ids = self.layout.list_projects().await?;
        ctx.set_total(ids.len());

        let mut result = ScanResult::default();
        for id in ids {
            if ctx.should_stop() {
                break;
            }
            ctx.advance(1);
            result.scanned += 1;

            let has_raw = tokio::fs::try_exists(self.layout.raw_content_path(&id))
                .await
                .unwrap_or(false);
            let has_record = tokio::fs::try_exists(self.layout.record_path(&id))
                .await
                .unwrap_or(false);
            if !has_raw {
                result.missing_raw_content += 1;
            }
            if !has_record {
                result.missing_record += 1;
            }

            let queued = match mode {
                ScanMode::MissingRawContent => !has_raw,
                ScanMode::PendingParse { skip_parsed } => has_raw && !(*skip_parsed && has_record),
                ScanMode::PendingImages { size } => {
                    has_record && self.needs_images(&id, size, &mut result).await
                }
                ScanMode::IdRange { .. } => false,
            };
            if queued {
                result.queue.push(id);
            }
        }

        Ok(result)
    }

    async fn needs_images(&self, id: &ProjectId, size: &str, result: &mut ScanResult) -> bool {
        let record = match fs_err::tokio::read_to_string(self.layout.record_path(id)).await {
            Ok(raw) => serde_json::from_str::<ParsedRecord>(&raw).map_err(anyhow::Error::from),
            Err(error) => Err(error.into()),
        };
        let record = match record {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(project_id = %id, error = ?error, "Unreadable record");
                result.unreadable += 1;
                return false;
            }
        };

        let listed = record.gallery_len();
        if listed == 0 {
            return false;
        }
        match self.layout.count_images(id, size).await {
            Ok(on_disk) => on_disk < listed,
            Err(error) => {
                tracing::warn!(project_id = %id, error = ?error, "Unreadable gallery folder");
                true
            }
        }
    }

    async fn id_range(&self, ctx: &TaskContext, start: u64, end: u64) -> Result<ScanResult> {
        let (low, high) = (start.min(end), start.max(end));
        let span = high - low;
        anyhow::ensure!(
            span < MAX_ID_RANGE,
            "Id range {start}..={end} holds more than {MAX_ID_RANGE} ids"
        );
        let scanned = usize::try_from(span + 1)?;
        ctx.set_total(scanned);

        let range: Box<dyn Iterator<Item = u64> + Send> = if start <= end {
            Box::new(low..=high)
        } else {
            Box::new((low..=high).rev())
        };

        let existing: HashSet<ProjectId> = if tokio::fs::try_exists(self.layout.root()).await? {
            self.layout.list_projects().await?.into_iter().collect()
        } else {
            HashSet::new()
        };

        let mut result = ScanResult {
            scanned,
            ..ScanResult::default()
        };
        result.queue = range
            .map(ProjectId::from)
            .filter(|id| !existing.contains(id))
            .filter(|id| {
                self.invalid_ids
                    .as_ref()
                    .is_none_or(|invalid| !invalid.contains(id))
            })
            .collect();
        ctx.set_curr(result.scanned);
        Ok(result)
    }
}

/// Decides which projects need embeddings.
///
/// Projects with chunks already stored are `Complete` with `skip_existing`, otherwise their
/// chunks are deleted and they are queued. Projects without a content document are `Complete`,
/// a content document without `main_content` is a `Failure`.
///
/// # Errors
///
/// Errors only if the projects folder cannot be listed; store errors fail the project.
#[tracing::instrument(skip_all, name = "scan.embedding_candidates")]
pub async fn scan_embedding_candidates(
    ctx: &TaskContext,
    layout: &ProjectLayout,
    contents: &dyn ContentStore,
    embeddings: &dyn EmbeddingStore,
    skip_existing: bool,
) -> Result<ScanResult> {
    let ids = layout.list_projects().await?;
    ctx.set_total(ids.len());

    let mut result = ScanResult::default();
    for id in ids {
        if ctx.should_stop() {
            break;
        }
        ctx.advance(1);
        ctx.report_project_start(&id);
        result.scanned += 1;

        let outcome = match embedding_candidate(&id, contents, embeddings, skip_existing).await {
            Ok(Candidate::Queue) => {
                result.queue.push(id.clone());
                archscout_core::StageOutcome::Success
            }
            Ok(Candidate::Done) => archscout_core::StageOutcome::Complete,
            Ok(Candidate::NoContent) => {
                tracing::warn!(project_id = %id, "Content document has no main_content");
                result.unreadable += 1;
                archscout_core::StageOutcome::Failure
            }
            Err(error) => {
                tracing::error!(project_id = %id, error = ?error, "Embedding scan failed");
                result.unreadable += 1;
                archscout_core::StageOutcome::Failure
            }
        };
        ctx.report_project_outcome(&id, outcome);
    }

    result.report(ctx);
    tracing::info!(scanned = result.scanned, queued = result.queue.len(), "Embedding scan finished");
    Ok(result)
}

enum Candidate {
    Queue,
    Done,
    NoContent,
}

async fn embedding_candidate(
    id: &ProjectId,
    contents: &dyn ContentStore,
    embeddings: &dyn EmbeddingStore,
    skip_existing: bool,
) -> Result<Candidate> {
    if embeddings.has_project(id).await? {
        if skip_existing {
            return Ok(Candidate::Done);
        }
        let removed = embeddings.delete_project(id).await?;
        tracing::info!(project_id = %id, removed, "Removed existing chunks, re-embedding");
        return Ok(Candidate::Queue);
    }

    match contents.get(id).await? {
        None => Ok(Candidate::Done),
        Some(record) if record.main_content.is_none() => Ok(Candidate::NoContent),
        Some(_) => Ok(Candidate::Queue),
    }
}
