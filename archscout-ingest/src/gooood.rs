//! Crawls the Gooood post listing and splits it into project folders.
//!
//! The listing api returns posts a page at a time. Pages are kept verbatim under
//! `<results>/pages/`, then [`GoooodCrawler::init_projects`] writes each post to
//! `<projects>/<id>/<id>.json` where the regular parse stage picks it up.
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use archscout_core::progress::TaskContext;
use archscout_core::{ProjectId, ProjectLayout, Settings, Source};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::http::scrape_client;

const PAGE_PLACEHOLDER: &str = "<page>";
const PAGES_DIR: &str = "pages";

/// Crawl-all gives up after this many failed pages in a row
const MAX_CONSECUTIVE_FAILURES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRange {
    /// From page 1 until the listing runs out
    All,
    /// Both ends inclusive, in either order
    Pages { start: u32, end: u32 },
}

impl PageRange {
    fn bounds(self) -> (u32, Option<u32>) {
        match self {
            PageRange::All => (1, None),
            PageRange::Pages { start, end } => (start.min(end), Some(start.max(end))),
        }
    }

    /// Number of pages in a bounded range
    fn page_count(self) -> Option<usize> {
        let (start, end) = self.bounds();
        end.map(|end| usize::try_from(end - start).map_or(usize::MAX, |span| span.saturating_add(1)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    /// First page that came back empty
    pub last_page: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub written: usize,
    pub skipped: usize,
    pub invalid: usize,
}

#[derive(Debug, Clone)]
pub struct GoooodCrawler {
    client: reqwest::Client,
    url_template: String,
    results_dir: PathBuf,
    layout: ProjectLayout,
}

impl GoooodCrawler {
    pub fn new(
        client: reqwest::Client,
        url_template: impl Into<String>,
        results_dir: impl Into<PathBuf>,
        layout: ProjectLayout,
    ) -> Self {
        Self {
            client,
            url_template: url_template.into(),
            results_dir: results_dir.into(),
            layout,
        }
    }

    /// # Errors
    ///
    /// Errors if the http client cannot be built.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            scrape_client(settings)?,
            &settings.gooood_base_url,
            &settings.gooood_results_dir,
            settings.layout(Source::Gooood),
        ))
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.results_dir.join(PAGES_DIR)
    }

    pub fn page_path(&self, page: u32) -> PathBuf {
        self.pages_dir().join(format!("page_{page:05}.json"))
    }

    fn page_url(&self, page: u32) -> String {
        self.url_template.replace(PAGE_PLACEHOLDER, &page.to_string())
    }

    /// Saves listing pages one after another until the range ends or a page comes back empty.
    ///
    /// # Errors
    ///
    /// Errors if the pages folder cannot be created.
    #[tracing::instrument(skip_all, name = "gooood.crawl_pages", fields(range = ?range))]
    pub async fn crawl_pages(
        &self,
        ctx: &TaskContext,
        range: PageRange,
        skip_existing: bool,
    ) -> Result<CrawlReport> {
        fs_err::tokio::create_dir_all(self.pages_dir()).await?;

        let (start, end) = range.bounds();
        if let Some(total) = range.page_count() {
            ctx.set_total(total);
        }
        ctx.set_curr(0);

        let mut report = CrawlReport::default();
        let mut consecutive_failures = 0;
        let mut page = start;

        loop {
            if end.is_some_and(|end| page > end) || ctx.should_stop() {
                break;
            }
            let id = ProjectId::new(format!("page_{page:05}"));
            ctx.report_project_start(&id);

            if skip_existing && tokio::fs::try_exists(self.page_path(page)).await.unwrap_or(false) {
                tracing::debug!(page, "Page already saved");
                report.skipped += 1;
                ctx.report_project_complete(&id);
            } else {
                match self.crawl_page(page).await {
                    Ok(true) => {
                        report.saved += 1;
                        consecutive_failures = 0;
                        ctx.report_project_success(&id);
                    }
                    Ok(false) => {
                        tracing::info!(page, "Listing has no more posts");
                        report.last_page = Some(page);
                        ctx.report_project_complete(&id);
                        ctx.advance(1);
                        break;
                    }
                    Err(error) => {
                        tracing::error!(page, error = ?error, "Failed to crawl page");
                        report.failed += 1;
                        consecutive_failures += 1;
                        ctx.report_project_failed(&id);
                    }
                }
            }

            ctx.advance(1);
            if end.is_none() && consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                tracing::error!(page, "Too many failed pages in a row, stopping");
                break;
            }
            let Some(next) = page.checked_add(1) else {
                break;
            };
            page = next;
        }

        tracing::info!(
            saved = report.saved,
            skipped = report.skipped,
            failed = report.failed,
            "Crawl finished"
        );
        ctx.set_custom("crawl", serde_json::to_value(report)?);
        Ok(report)
    }

    /// `false` when the page holds no posts
    async fn crawl_page(&self, page: u32) -> Result<bool> {
        let url = self.page_url(page);
        tracing::debug!(page, %url, "Fetching listing page");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        anyhow::ensure!(status == StatusCode::OK, "Unexpected status {status}");

        let posts: Vec<Value> = response
            .json()
            .await
            .context("Listing page is not a json array")?;
        if posts.is_empty() {
            return Ok(false);
        }

        fs_err::tokio::write(self.page_path(page), serde_json::to_string_pretty(&posts)?).await?;
        Ok(true)
    }

    /// Writes every post of every saved page to its own project folder.
    ///
    /// # Errors
    ///
    /// Errors if no pages have been crawled yet or a page file is not a json array.
    #[tracing::instrument(skip_all, name = "gooood.init_projects")]
    pub async fn init_projects(&self, ctx: &TaskContext, skip_existing: bool) -> Result<InitReport> {
        let pages = list_pages(&self.pages_dir()).await?;
        anyhow::ensure!(!pages.is_empty(), "No pages crawled yet, crawl pages first");

        ctx.set_total(pages.len());
        ctx.set_curr(0);
        let mut report = InitReport::default();

        for page in pages {
            if ctx.should_stop() {
                break;
            }
            let raw = fs_err::tokio::read_to_string(&page).await?;
            let posts: Vec<Value> = serde_json::from_str(&raw)
                .with_context(|| format!("Page {} is not a json array", page.display()))?;

            for post in posts {
                let Some(id) = post_id(&post) else {
                    tracing::warn!(page = %page.display(), "Post without id");
                    report.invalid += 1;
                    continue;
                };

                let path = self.layout.raw_content_path(&id);
                if skip_existing && tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    report.skipped += 1;
                    continue;
                }

                fs_err::tokio::create_dir_all(self.layout.project_dir(&id)).await?;
                fs_err::tokio::write(&path, serde_json::to_string_pretty(&post)?).await?;
                report.written += 1;
            }
            ctx.advance(1);
        }

        tracing::info!(
            written = report.written,
            skipped = report.skipped,
            invalid = report.invalid,
            "Projects initialised"
        );
        ctx.set_custom("init", serde_json::to_value(report)?);
        Ok(report)
    }
}

fn post_id(post: &Value) -> Option<ProjectId> {
    match post.get("id")? {
        Value::Number(number) => Some(ProjectId::new(number.to_string())),
        Value::String(id) if !id.is_empty() => Some(ProjectId::new(id.as_str())),
        _ => None,
    }
}

async fn list_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    if !tokio::fs::try_exists(dir).await? {
        return Ok(Vec::new());
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Pages folder {} is not readable", dir.display()))?;
    let mut pages = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            pages.push(path);
        }
    }
    pages.sort();
    Ok(pages)
}
