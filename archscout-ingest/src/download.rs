//! Downloads gallery images of parsed projects.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use archscout_core::progress::TaskContext;
use archscout_core::{ParsedRecord, ProjectId, ProjectLayout, Settings, Source, StageOutcome};
use reqwest::StatusCode;

use crate::http::scrape_client;
use crate::workers::{RunSummary, for_each_project};

/// Called before each image with `(project, index, total)`
pub type ProgressCallback = Arc<dyn Fn(&ProjectId, usize, usize) + Send + Sync>;

/// Per-project counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub existing: usize,
    pub failed: usize,
}

/// Stores `url_<size>` of every gallery entry as `image_gallery/<size>/<index:05>.jpg`.
///
/// Files already on disk are never requested again.
#[derive(Clone)]
pub struct ImageDownloader {
    client: reqwest::Client,
    layout: ProjectLayout,
    size: String,
    politeness_delay: Duration,
    on_progress: Option<ProgressCallback>,
}

impl fmt::Debug for ImageDownloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageDownloader")
            .field("layout", &self.layout)
            .field("size", &self.size)
            .field("politeness_delay", &self.politeness_delay)
            .finish()
    }
}

impl ImageDownloader {
    pub fn new(client: reqwest::Client, layout: ProjectLayout, size: impl Into<String>) -> Self {
        Self {
            client,
            layout,
            size: size.into(),
            politeness_delay: Duration::from_millis(200),
            on_progress: None,
        }
    }

    /// # Errors
    ///
    /// Errors if the http client cannot be built.
    pub fn from_settings(settings: &Settings, source: Source) -> Result<Self> {
        Ok(
            Self::new(scrape_client(settings)?, settings.layout(source), &settings.gallery_size)
                .with_politeness_delay(settings.politeness_delay()),
        )
    }

    /// Upper bound of the random pause after each request, zero disables it
    #[must_use]
    pub fn with_politeness_delay(mut self, delay: Duration) -> Self {
        self.politeness_delay = delay;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn size(&self) -> &str {
        &self.size
    }

    /// Downloads the gallery of one project.
    ///
    /// Single images that fail are logged and counted, the project is still a `Success`. A
    /// missing or unreadable record is a `Failure`.
    pub async fn download_gallery(&self, id: &ProjectId) -> StageOutcome {
        match self.download_images(id).await {
            Ok(report) => {
                tracing::debug!(
                    project_id = %id,
                    downloaded = report.downloaded,
                    existing = report.existing,
                    failed = report.failed,
                    "Gallery done"
                );
                StageOutcome::Success
            }
            Err(error) => {
                tracing::error!(project_id = %id, error = ?error, "Failed to download gallery");
                StageOutcome::Failure
            }
        }
    }

    /// # Errors
    ///
    /// Errors if the record cannot be read or decoded.
    pub async fn download_images(&self, id: &ProjectId) -> Result<DownloadReport> {
        let raw = fs_err::tokio::read_to_string(self.layout.record_path(id)).await?;
        let record: ParsedRecord = serde_json::from_str(&raw).context("Record is corrupt")?;
        let gallery = record.image_gallery.unwrap_or_default();
        let total = gallery.len();

        let mut report = DownloadReport::default();
        let dir = self.layout.gallery_dir(id, &self.size);
        if total > 0 {
            fs_err::tokio::create_dir_all(&dir).await?;
        }

        for (index, image) in gallery.iter().enumerate() {
            if let Some(callback) = &self.on_progress {
                callback(id, index, total);
            }

            let path = self.layout.image_path(id, &self.size, index);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                report.existing += 1;
                continue;
            }

            let Some(url) = image.url(&self.size) else {
                tracing::warn!(project_id = %id, index, size = %self.size, "Gallery entry has no url for size");
                report.failed += 1;
                continue;
            };

            match self.download_one(url, &path).await {
                Ok(()) => report.downloaded += 1,
                Err(error) => {
                    tracing::warn!(project_id = %id, index, url, error = ?error, "Image download failed");
                    report.failed += 1;
                }
            }
            self.pause().await;
        }

        Ok(report)
    }

    async fn download_one(&self, url: &str, path: &std::path::Path) -> Result<()> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            anyhow::bail!("Unexpected status {status}");
        }

        let bytes = response.bytes().await?;
        fs_err::tokio::write(path, bytes).await?;
        Ok(())
    }

    async fn pause(&self) {
        let max = u64::try_from(self.politeness_delay.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(rand::random_range(0..max))).await;
    }

    /// Downloads the galleries of every id in `ids`, reporting per-image progress to `ctx`.
    #[tracing::instrument(skip_all, name = "download.download_all", fields(total = ids.len(), size = %self.size))]
    pub async fn download_all(
        &self,
        ctx: &Arc<TaskContext>,
        ids: Vec<ProjectId>,
        concurrency: usize,
    ) -> RunSummary {
        let progress_ctx = Arc::clone(ctx);
        let downloader = self.clone().with_progress(Arc::new(move |id, index, total| {
            progress_ctx.report_project_sub_total(id, total);
            progress_ctx.report_project_sub_curr(id, index + 1);
        }));

        let summary = for_each_project(ctx, ids, concurrency, |id| {
            let downloader = downloader.clone();
            async move { downloader.download_gallery(&id).await }
        })
        .await;

        tracing::info!(
            success = summary.success,
            failure = summary.failure,
            "Gallery download finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archscout_core::GalleryImage;
    use std::sync::Mutex;
    use temp_dir::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn write_record(root: &TempDir, id: &str, urls: &[String]) {
        let record = ParsedRecord {
            image_gallery: Some(urls.iter().map(|url| GalleryImage::with_url("large", url)).collect()),
            ..Default::default()
        };
        std::fs::create_dir_all(root.child(id)).unwrap();
        std::fs::write(
            root.child(format!("{id}/content.json")),
            serde_json::to_string(&record).unwrap(),
        )
        .unwrap();
    }

    fn downloader(root: &TempDir) -> ImageDownloader {
        ImageDownloader::new(
            reqwest::Client::new(),
            ProjectLayout::new(root.path(), Source::Archdaily),
            "large",
        )
        .with_politeness_delay(Duration::ZERO)
    }

    #[test_log::test(tokio::test)]
    async fn test_only_missing_images_are_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpg".to_vec()))
            .expect(3)
            .mount(&server)
            .await;

        let root = TempDir::new().unwrap();
        let urls: Vec<_> = (0..5).map(|i| format!("{}/img/{i}.jpg", server.uri())).collect();
        write_record(&root, "1", &urls);
        let gallery = root.child("1/image_gallery/large");
        std::fs::create_dir_all(&gallery).unwrap();
        std::fs::write(gallery.join("00000.jpg"), b"old").unwrap();
        std::fs::write(gallery.join("00003.jpg"), b"old").unwrap();

        let report = downloader(&root).download_images(&"1".into()).await.unwrap();

        assert_eq!(
            report,
            DownloadReport {
                downloaded: 3,
                existing: 2,
                failed: 0
            }
        );
        assert_eq!(std::fs::read(gallery.join("00004.jpg")).unwrap(), b"jpg");
        assert_eq!(std::fs::read(gallery.join("00000.jpg")).unwrap(), b"old");
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_images_do_not_fail_the_project() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let root = TempDir::new().unwrap();
        write_record(&root, "1", &[format!("{}/img/0.jpg", server.uri())]);

        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let downloader = downloader(&root).with_progress(Arc::new(move |_, index, total| {
            seen.lock().unwrap().push((index, total));
        }));

        assert_eq!(downloader.download_gallery(&"1".into()).await, StageOutcome::Success);
        assert_eq!(*calls.lock().unwrap(), vec![(0, 1)]);
        assert!(!root.child("1/image_gallery/large/00000.jpg").exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_record_fails() {
        let root = TempDir::new().unwrap();
        assert_eq!(
            downloader(&root).download_gallery(&"1".into()).await,
            StageOutcome::Failure
        );
    }
}
