//! Downloads raw project pages to disk.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context as _, Result};
use archscout_core::progress::TaskContext;
use archscout_core::{
    FetchOutcome, InvalidIds, ProjectId, ProjectLayout, Settings, SkipReason, Source, SuccessLog,
    saving_gap,
};
use reqwest::StatusCode;
use url::Url;

use crate::http::scrape_client;
use crate::workers::{RunSummary, for_each_project};

/// Fetches ArchDaily pages into `<projects>/<id>/content.html`.
///
/// Cheap to clone, clones share the client and the success log.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    base_url: Url,
    layout: ProjectLayout,
    success_log: Arc<SuccessLog>,
}

impl Fetcher {
    /// # Errors
    ///
    /// Errors if `base_url` is not a valid url.
    pub fn new(client: reqwest::Client, base_url: &str, layout: ProjectLayout) -> Result<Self> {
        Ok(Self {
            client,
            base_url: Url::parse(base_url).with_context(|| format!("Invalid base url {base_url}"))?,
            layout,
            success_log: Arc::new(SuccessLog::new("content_html")),
        })
    }

    /// # Errors
    ///
    /// Errors if the http client cannot be built or the base url is invalid.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            scrape_client(settings)?,
            &settings.archdaily_base_url,
            settings.layout(Source::Archdaily),
        )
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Fetches one project page.
    ///
    /// Never errors: ids already on disk or known invalid are skipped without a request, a 404
    /// marks the id invalid, everything else that goes wrong is a logged `Failure`.
    pub async fn fetch(
        &self,
        id: &ProjectId,
        invalid_ids: &InvalidIds,
        force_update: bool,
    ) -> FetchOutcome {
        if invalid_ids.contains(id) {
            return FetchOutcome::Skipped(SkipReason::KnownInvalid);
        }

        let path = self.layout.raw_content_path(id);
        if !force_update && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return FetchOutcome::Skipped(SkipReason::AlreadyFetched);
        }

        match self.request(id, invalid_ids).await {
            Ok(outcome) => {
                if outcome == FetchOutcome::Success {
                    self.success_log.record(id);
                }
                outcome
            }
            Err(error) => {
                tracing::error!(project_id = %id, error = ?error, "Failed to fetch project");
                FetchOutcome::Failure
            }
        }
    }

    async fn request(&self, id: &ProjectId, invalid_ids: &InvalidIds) -> Result<FetchOutcome> {
        let url = self.base_url.join(id.as_str())?;
        tracing::debug!(project_id = %id, %url, "Fetching project page");

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            invalid_ids.insert(id);
            tracing::debug!(project_id = %id, "Project does not exist");
            return Ok(FetchOutcome::Skipped(SkipReason::NotFound));
        }

        if status != StatusCode::OK {
            tracing::warn!(project_id = %id, status = status.as_u16(), "Unexpected status");
            return Ok(FetchOutcome::Failure);
        }

        let body = response.text().await?;
        let dir = self.layout.project_dir(id);
        fs_err::tokio::create_dir_all(&dir).await?;
        fs_err::tokio::write(self.layout.raw_content_path(id), body).await?;

        Ok(FetchOutcome::Success)
    }

    /// Fetches every id in `ids`, saving the invalid-id set every [`saving_gap`] projects and
    /// once more at the end.
    ///
    /// # Errors
    ///
    /// Errors if the final save of the invalid-id set fails.
    #[tracing::instrument(skip_all, name = "fetch.fetch_all", fields(total = ids.len()))]
    pub async fn fetch_all(
        &self,
        ctx: &TaskContext,
        ids: Vec<ProjectId>,
        invalid_ids: &InvalidIds,
        concurrency: usize,
    ) -> Result<RunSummary> {
        let gap = saving_gap(ids.len());
        let processed = Arc::new(AtomicUsize::new(0));

        let summary = for_each_project(ctx, ids, concurrency, |id| {
            let fetcher = self.clone();
            let invalid_ids = invalid_ids.clone();
            let processed = Arc::clone(&processed);
            async move {
                let outcome = fetcher.fetch(&id, &invalid_ids, false).await;
                if (processed.fetch_add(1, Ordering::Relaxed) + 1) % gap == 0 {
                    if let Err(error) = invalid_ids.save().await {
                        tracing::warn!(error = ?error, "Periodic save of invalid ids failed");
                    }
                }
                outcome.into()
            }
        })
        .await;

        self.success_log.flush();
        invalid_ids.save().await?;

        tracing::info!(
            success = summary.success,
            failure = summary.failure,
            skipped = summary.complete,
            invalid_ids = invalid_ids.len(),
            "Fetch finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(server: &MockServer, root: &TempDir) -> Fetcher {
        Fetcher::new(
            reqwest::Client::new(),
            &format!("{}/", server.uri()),
            ProjectLayout::new(root.path(), Source::Archdaily),
        )
        .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_known_invalid_id_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let root = TempDir::new().unwrap();
        let invalid = InvalidIds::new(root.child("invalid.json"));
        invalid.insert(&"7".into());

        let outcome = fetcher(&server, &root).fetch(&"7".into(), &invalid, true).await;
        assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::KnownInvalid));
    }

    #[test_log::test(tokio::test)]
    async fn test_existing_raw_content_is_not_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>new</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let root = TempDir::new().unwrap();
        let fetcher = fetcher(&server, &root);
        let id = ProjectId::from("12");
        let raw = fetcher.layout().raw_content_path(&id);
        std::fs::create_dir_all(raw.parent().unwrap()).unwrap();
        std::fs::write(&raw, "<html>old</html>").unwrap();
        let invalid = InvalidIds::new(root.child("invalid.json"));

        assert_eq!(
            fetcher.fetch(&id, &invalid, false).await,
            FetchOutcome::Skipped(SkipReason::AlreadyFetched)
        );
        assert_eq!(std::fs::read_to_string(&raw).unwrap(), "<html>old</html>");

        assert_eq!(fetcher.fetch(&id, &invalid, true).await, FetchOutcome::Success);
        assert_eq!(std::fs::read_to_string(&raw).unwrap(), "<html>new</html>");
    }

    #[test_log::test(tokio::test)]
    async fn test_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>1</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/3"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let root = TempDir::new().unwrap();
        let fetcher = fetcher(&server, &root);
        let invalid = InvalidIds::new(root.child("invalid.json"));

        assert_eq!(fetcher.fetch(&"1".into(), &invalid, false).await, FetchOutcome::Success);
        assert_eq!(
            fetcher.fetch(&"2".into(), &invalid, false).await,
            FetchOutcome::Skipped(SkipReason::NotFound)
        );
        assert_eq!(fetcher.fetch(&"3".into(), &invalid, false).await, FetchOutcome::Failure);

        assert!(invalid.contains(&"2".into()));
        assert!(!invalid.contains(&"3".into()));
        assert!(root.child("1/content.html").exists());
        assert!(!root.child("3").exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_fetch_all_saves_invalid_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let root = TempDir::new().unwrap();
        let invalid = InvalidIds::new(root.child("results/invalid.json"));
        let ctx = TaskContext::new("archdaily-fetch");

        let summary = fetcher(&server, &root)
            .fetch_all(&ctx, vec!["1".into(), "2".into()], &invalid, 4)
            .await
            .unwrap();

        assert_eq!(summary.complete, 2);
        let saved = InvalidIds::load(root.child("results/invalid.json")).await.unwrap();
        assert_eq!(saved.len(), 2);
    }
}
