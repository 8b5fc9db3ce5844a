//! Turns raw project content into `content.json` records.
use std::sync::Arc;

use anyhow::{Context as _, Result};
use archscout_core::progress::TaskContext;
use archscout_core::{
    ForceUpdate, GalleryImage, ParseOutcome, ParsedRecord, ProjectId, ProjectLayout, RecordField,
    Settings, Source, StageOutcome, SuccessLog,
};
use strum::IntoEnumIterator as _;
use url::Url;

use crate::http::scrape_client;
use crate::sources::{Extraction, Gallery, SourceRules, rules_for};
use crate::workers::{RunSummary, for_each_project};

/// Key older records carried at the top level before `specs` existed
const LEGACY_YEAR_KEY: &str = "year";

/// Parses raw content with the rules of one source and merges the result into the record
/// on disk.
///
/// Only fields that are absent, or forced, are recomputed. A field whose extractor fails keeps
/// its previous value, so a parse never loses data.
#[derive(Debug, Clone)]
pub struct Parser {
    client: reqwest::Client,
    rules: Arc<dyn SourceRules>,
    layout: ProjectLayout,
    success_log: Arc<SuccessLog>,
}

impl Parser {
    pub fn new(client: reqwest::Client, rules: Arc<dyn SourceRules>, layout: ProjectLayout) -> Self {
        Self {
            client,
            rules,
            layout,
            success_log: Arc::new(SuccessLog::new("content_json")),
        }
    }

    /// # Errors
    ///
    /// Errors if the http client or the source rules cannot be built.
    pub fn from_settings(settings: &Settings, source: Source) -> Result<Self> {
        let rules = rules_for(source, &settings.archdaily_base_url, &settings.ignore_keywords)?;
        Ok(Self::new(
            scrape_client(settings)?,
            Arc::from(rules),
            settings.layout(source),
        ))
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Parses one project. Errors are logged and reported as `Failure`.
    pub async fn parse(&self, id: &ProjectId, force: ForceUpdate) -> ParseOutcome {
        match self.try_parse(id, force).await {
            Ok(outcome) => {
                if outcome == ParseOutcome::Changed {
                    self.success_log.record(id);
                }
                outcome
            }
            Err(error) => {
                tracing::error!(project_id = %id, error = ?error, "Failed to parse project");
                ParseOutcome::Failure
            }
        }
    }

    async fn try_parse(&self, id: &ProjectId, force: ForceUpdate) -> Result<ParseOutcome> {
        let raw_path = self.layout.raw_content_path(id);
        let raw = fs_err::tokio::read_to_string(&raw_path)
            .await
            .context("Raw content missing")?;

        let mut record = self.load_record(id).await?;
        let wanted: Vec<RecordField> = RecordField::iter()
            .filter(|field| !record.has(*field) || force.is_forced(*field))
            .collect();
        if wanted.is_empty() {
            return Ok(ParseOutcome::Unchanged);
        }
        tracing::debug!(project_id = %id, ?wanted, "Extracting fields");

        let rules = Arc::clone(&self.rules);
        let mut extraction = tokio::task::spawn_blocking(move || rules.extract(&raw, &wanted))
            .await
            .context("Extraction task failed")??;

        let gallery = self.resolve_gallery(id, extraction.gallery.take()).await;
        let changed = merge(&mut record, extraction, gallery);
        if !changed {
            return Ok(ParseOutcome::Unchanged);
        }

        let json = serde_json::to_string_pretty(&record)?;
        fs_err::tokio::write(self.layout.record_path(id), json).await?;
        Ok(ParseOutcome::Changed)
    }

    /// Existing record, or an empty one if missing or not valid json.
    ///
    /// Valid json of the wrong shape is an error so the file is never overwritten.
    async fn load_record(&self, id: &ProjectId) -> Result<ParsedRecord> {
        let path = self.layout.record_path(id);
        let Ok(raw) = fs_err::tokio::read_to_string(&path).await else {
            return Ok(ParsedRecord::default());
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Ok(record),
            Err(error) if error.is_syntax() || error.is_eof() => {
                tracing::warn!(project_id = %id, %error, "Existing record is corrupt, starting over");
                Ok(ParsedRecord::default())
            }
            Err(error) => Err(error).context("Existing record has an unexpected shape"),
        }
    }

    async fn resolve_gallery(&self, id: &ProjectId, gallery: Option<Gallery>) -> Option<Vec<GalleryImage>> {
        match gallery? {
            Gallery::Images(images) => Some(images),
            Gallery::Page(url) => match self.gallery_page(url).await {
                Ok(images) => Some(images),
                Err(error) => {
                    tracing::warn!(project_id = %id, error = ?error, "Gallery page failed, keeping previous gallery");
                    None
                }
            },
        }
    }

    async fn gallery_page(&self, url: Url) -> Result<Vec<GalleryImage>> {
        tracing::debug!(%url, "Fetching gallery page");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let html = response.text().await?;

        let rules = Arc::clone(&self.rules);
        tokio::task::spawn_blocking(move || rules.gallery_page_images(&html)).await?
    }

    /// Parses every id in `ids`. With `skip_parsed`, projects that already have a record are
    /// `Complete` without being read.
    #[tracing::instrument(skip_all, name = "parse.parse_all", fields(source = %self.rules.source(), total = ids.len()))]
    pub async fn parse_all(
        &self,
        ctx: &TaskContext,
        ids: Vec<ProjectId>,
        force: ForceUpdate,
        skip_parsed: bool,
        concurrency: usize,
    ) -> RunSummary {
        let summary = for_each_project(ctx, ids, concurrency, |id| {
            let parser = self.clone();
            async move {
                let record_path = parser.layout.record_path(&id);
                if skip_parsed && tokio::fs::try_exists(&record_path).await.unwrap_or(false) {
                    return StageOutcome::Complete;
                }
                parser.parse(&id, force).await.into()
            }
        })
        .await;

        self.success_log.flush();
        tracing::info!(
            changed = summary.success,
            unchanged = summary.complete,
            failure = summary.failure,
            "Parse finished"
        );
        summary
    }
}

/// Applies every successful extraction to the record. Returns true if anything was written.
fn merge(record: &mut ParsedRecord, extraction: Extraction, gallery: Option<Vec<GalleryImage>>) -> bool {
    let mut changed = false;

    if let Some(main_content) = extraction.main_content {
        record.main_content = Some(main_content);
        changed = true;
    }
    if let Some(gallery) = gallery {
        record.image_gallery = Some(gallery);
        changed = true;
    }
    if let Some(title) = extraction.title {
        record.title = Some(title);
        changed = true;
    }
    if let Some(tags) = extraction.tags {
        record.tags = Some(tags);
        changed = true;
    }
    if let Some(specs) = extraction.specs {
        record.specs = Some(specs);
        record.extra.remove(LEGACY_YEAR_KEY);
        changed = true;
    }

    changed
}
