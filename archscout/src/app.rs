//! One session of the pipeline: settings, running tasks and the queue that connects the stages.
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use archscout_core::progress::{StartOptions, TaskContext, TaskRegistry};
use archscout_core::{
    ContentStore, EmbeddingModel, EmbeddingStore, ForceUpdate, InvalidIds, ProjectId, Settings,
    Source,
};
use archscout_ingest::persist::{MemoryContentStore, MemoryEmbeddingStore};
use archscout_ingest::{
    Chunker, Fetcher, GoooodCrawler, ImageDownloader, LocalEmbedder, PageRange, Parser,
    RemoteEmbedder, ScanMode, Scanner, Uploader, repair_nan_embeddings, scan_embedding_candidates,
};
use archscout_integrations::mongo::Mongo;
use archscout_integrations::openai::CompatibleModel;
use archscout_query::{Proposal, ProposalGenerator, Retriever};
use tokio::sync::Mutex;

/// Where records and chunks of one source are stored
#[derive(Debug, Clone)]
pub struct Stores {
    pub contents: Arc<dyn ContentStore>,
    pub embeddings: Arc<dyn EmbeddingStore>,
}

impl Stores {
    pub fn new(
        contents: impl ContentStore + 'static,
        embeddings: impl EmbeddingStore + 'static,
    ) -> Self {
        Self {
            contents: Arc::new(contents),
            embeddings: Arc::new(embeddings),
        }
    }

    /// Stores that live in this process only, for dry runs
    pub fn in_memory() -> Self {
        Self::new(MemoryContentStore::default(), MemoryEmbeddingStore::default())
    }
}

/// Which embedding model a run talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedBackend {
    /// The hosted model, one worker per API key
    Remote,
    /// The locally served model
    Local,
}

/// Owns everything a session shares between stages.
///
/// Scans fill the work queue; fetch, parse, download and embed runs take it. Runners return as
/// soon as the task is started, use [`TaskContext::wait`] to wait for the result.
#[derive(Debug)]
pub struct AppContext {
    settings: Settings,
    registry: Arc<TaskRegistry>,
    queue: Mutex<Vec<ProjectId>>,
    invalid_ids: InvalidIds,
    stores: Mutex<HashMap<Source, Stores>>,
}

fn task_name(source: Source, stage: &str) -> String {
    format!("{source}-{stage}")
}

impl AppContext {
    /// # Errors
    ///
    /// Errors if the invalid-id file exists but cannot be read.
    pub async fn new(settings: Settings) -> Result<Arc<Self>> {
        let invalid_ids = InvalidIds::load(settings.invalid_project_ids_path.clone()).await?;
        tracing::info!(invalid_ids = invalid_ids.len(), "Loaded invalid ids");

        Ok(Arc::new(Self {
            settings,
            registry: TaskRegistry::new(),
            queue: Mutex::new(Vec::new()),
            invalid_ids,
            stores: Mutex::new(HashMap::new()),
        }))
    }

    /// # Errors
    ///
    /// Errors if the settings file is corrupt or the invalid-id file cannot be read.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::new(Settings::load(path)?).await
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn invalid_ids(&self) -> &InvalidIds {
        &self.invalid_ids
    }

    pub fn task(&self, name: &str) -> Option<Arc<TaskContext>> {
        self.registry.get(name)
    }

    pub async fn queue(&self) -> Vec<ProjectId> {
        self.queue.lock().await.clone()
    }

    pub async fn set_queue(&self, ids: Vec<ProjectId>) {
        *self.queue.lock().await = ids;
    }

    async fn take_queue(&self) -> Vec<ProjectId> {
        std::mem::take(&mut *self.queue.lock().await)
    }

    /// Uses `stores` for `source` instead of connecting to MongoDB
    pub async fn with_stores(&self, source: Source, stores: Stores) {
        self.stores.lock().await.insert(source, stores);
    }

    /// The stores of `source`, connecting to MongoDB on first use.
    ///
    /// # Errors
    ///
    /// Errors if the database cannot be reached.
    pub async fn stores(&self, source: Source) -> Result<Stores> {
        let mut stores = self.stores.lock().await;
        if let Some(existing) = stores.get(&source) {
            return Ok(existing.clone());
        }

        let mongo = Mongo::from_settings(&self.settings, source).await?;
        mongo.ping().await?;
        let embeddings = mongo.embedding_store();
        embeddings.ensure_indexes().await?;
        tracing::info!(database = mongo.database_name(), "Connected to MongoDB");

        let connected = Stores::new(mongo.content_store(), embeddings);
        stores.insert(source, connected.clone());
        Ok(connected)
    }

    fn embedding_model(&self, backend: EmbedBackend) -> Arc<dyn EmbeddingModel> {
        match backend {
            EmbedBackend::Remote => Arc::new(CompatibleModel::remote(&self.settings)),
            EmbedBackend::Local => Arc::new(CompatibleModel::local(&self.settings)),
        }
    }

    fn chunker(&self) -> Result<Chunker> {
        Chunker::new(self.settings.chunk_size, self.settings.chunk_overlap)
    }

    /// Starts a stage that consumes the work queue. Refused while another task runs or when the
    /// previous task belonged to another source.
    fn start_with_queue<F, Fut>(
        self: &Arc<Self>,
        source: Source,
        stage: &str,
        work: F,
    ) -> Result<Arc<TaskContext>>
    where
        F: FnOnce(Arc<Self>, Arc<TaskContext>, Vec<ProjectId>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let app = Arc::clone(self);
        let ctx = self.registry.start(
            task_name(source, stage),
            StartOptions::singleton().with_scope_check(),
            move |ctx| async move {
                let ids = app.take_queue().await;
                tracing::info!(queued = ids.len(), "Taking work queue");
                work(app, ctx, ids).await
            },
        )?;
        Ok(ctx)
    }

    fn start<F, Fut>(
        self: &Arc<Self>,
        source: Source,
        stage: &str,
        work: F,
    ) -> Result<Arc<TaskContext>>
    where
        F: FnOnce(Arc<Self>, Arc<TaskContext>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let app = Arc::clone(self);
        let ctx = self.registry.start(
            task_name(source, stage),
            StartOptions::singleton(),
            move |ctx| work(app, ctx),
        )?;
        Ok(ctx)
    }

    /// Scans `source` and replaces the work queue with the result
    ///
    /// # Errors
    ///
    /// Errors if another task is running.
    pub fn run_scan(self: &Arc<Self>, source: Source, mode: ScanMode) -> Result<Arc<TaskContext>> {
        let scanner = Scanner::new(self.settings.layout(source))
            .with_invalid_ids(self.invalid_ids.clone());

        self.start(source, "scan", move |app, ctx| async move {
            let result = scanner.scan(&ctx, &mode).await?;
            app.set_queue(result.queue).await;
            Ok(())
        })
    }

    /// Fetches the raw pages of the queued ArchDaily ids
    ///
    /// # Errors
    ///
    /// Errors if the task is refused or the http client cannot be built.
    pub fn run_fetch(self: &Arc<Self>) -> Result<Arc<TaskContext>> {
        let fetcher = Fetcher::from_settings(&self.settings)?;
        let concurrency = self.settings.concurrency.fetch;

        self.start_with_queue(Source::Archdaily, "fetch", move |app, ctx, ids| async move {
            let summary = fetcher
                .fetch_all(&ctx, ids, &app.invalid_ids, concurrency)
                .await?;
            tracing::info!(?summary, "Fetch finished");
            Ok(())
        })
    }

    /// Parses the queued ids of `source` into records
    ///
    /// # Errors
    ///
    /// Errors if the task is refused or the parser cannot be built.
    pub fn run_parse(
        self: &Arc<Self>,
        source: Source,
        force: ForceUpdate,
        skip_parsed: bool,
    ) -> Result<Arc<TaskContext>> {
        let parser = Parser::from_settings(&self.settings, source)?;
        let concurrency = self.settings.concurrency.parse;

        self.start_with_queue(source, "parse", move |_, ctx, ids| async move {
            let summary = parser
                .parse_all(&ctx, ids, force, skip_parsed, concurrency)
                .await;
            tracing::info!(?summary, "Parse finished");
            Ok(())
        })
    }

    /// Downloads the galleries of the queued ids of `source`
    ///
    /// # Errors
    ///
    /// Errors if the task is refused or the http client cannot be built.
    pub fn run_download(self: &Arc<Self>, source: Source) -> Result<Arc<TaskContext>> {
        let downloader = ImageDownloader::from_settings(&self.settings, source)?;
        let concurrency = self.settings.concurrency.download;

        self.start_with_queue(source, "download", move |_, ctx, ids| async move {
            let summary = downloader.download_all(&ctx, ids, concurrency).await;
            tracing::info!(?summary, "Download finished");
            Ok(())
        })
    }

    /// Uploads every local record of `source` to its content store
    ///
    /// # Errors
    ///
    /// Errors if another task is running.
    pub fn run_upload(
        self: &Arc<Self>,
        source: Source,
        skip_existing: bool,
    ) -> Result<Arc<TaskContext>> {
        let layout = self.settings.layout(source);
        let concurrency = self.settings.concurrency.upload;

        self.start(source, "upload", move |app, ctx| async move {
            let stores = app.stores(source).await?;
            let ids = layout.list_projects().await?;
            let summary = Uploader::new(layout, stores.contents)
                .upload_all(&ctx, ids, skip_existing, concurrency)
                .await;
            tracing::info!(?summary, "Upload finished");
            Ok(())
        })
    }

    /// Queues the projects of `source` whose chunks still have to be embedded
    ///
    /// # Errors
    ///
    /// Errors if another task is running.
    pub fn run_embedding_scan(
        self: &Arc<Self>,
        source: Source,
        skip_existing: bool,
    ) -> Result<Arc<TaskContext>> {
        let layout = self.settings.layout(source);

        self.start(source, "embedding_scan", move |app, ctx| async move {
            let stores = app.stores(source).await?;
            let result = scan_embedding_candidates(
                &ctx,
                &layout,
                stores.contents.as_ref(),
                stores.embeddings.as_ref(),
                skip_existing,
            )
            .await?;
            tracing::info!(queued = result.queue.len(), "Embedding scan finished");
            app.set_queue(result.queue).await;
            Ok(())
        })
    }

    /// Chunks and embeds the queued ids of `source`
    ///
    /// # Errors
    ///
    /// Errors if the task is refused, the chunking settings are invalid or, for the remote
    /// backend, no API key is configured.
    pub fn run_embed(
        self: &Arc<Self>,
        source: Source,
        backend: EmbedBackend,
    ) -> Result<Arc<TaskContext>> {
        let chunker = self.chunker()?;

        match backend {
            EmbedBackend::Remote => {
                anyhow::ensure!(
                    !self.settings.api_keys.is_empty(),
                    "No API keys configured for remote embedding"
                );
                self.start_with_queue(source, "embed", move |app, ctx, ids| async move {
                    let stores = app.stores(source).await?;
                    let embedder = RemoteEmbedder::new(
                        &CompatibleModel::remote(&app.settings),
                        &app.settings.api_keys,
                        app.settings.min_request_interval(),
                        stores.contents,
                        stores.embeddings,
                        chunker,
                    )?
                    .with_attempts(app.settings.embed_attempts);

                    let summary = embedder.embed_all(&ctx, ids).await;
                    tracing::info!(?summary, "Remote embedding finished");
                    Ok(())
                })
            }
            EmbedBackend::Local => {
                self.start_with_queue(source, "embed_local", move |app, ctx, ids| async move {
                    let stores = app.stores(source).await?;
                    let embedder = LocalEmbedder::new(
                        app.embedding_model(EmbedBackend::Local),
                        stores.contents,
                        stores.embeddings,
                        chunker,
                    );

                    let summary = embedder.embed_all(&ctx, ids).await;
                    tracing::info!(?summary, "Local embedding finished");
                    Ok(())
                })
            }
        }
    }

    /// Re-embeds stored chunks of `source` whose vectors contain NaN, with the model that
    /// produced them
    ///
    /// # Errors
    ///
    /// Errors if another task is running.
    pub fn run_repair(
        self: &Arc<Self>,
        source: Source,
        backend: EmbedBackend,
    ) -> Result<Arc<TaskContext>> {
        self.start(source, "repair", move |app, ctx| async move {
            let stores = app.stores(source).await?;
            let model = app.embedding_model(backend);
            repair_nan_embeddings(&ctx, model.as_ref(), stores.embeddings.as_ref()).await?;
            Ok(())
        })
    }

    /// Saves Gooood listing pages
    ///
    /// # Errors
    ///
    /// Errors if the task is refused or the http client cannot be built.
    pub fn run_gooood_crawl(
        self: &Arc<Self>,
        range: PageRange,
        skip_existing: bool,
    ) -> Result<Arc<TaskContext>> {
        let crawler = GoooodCrawler::from_settings(&self.settings)?;

        self.start(Source::Gooood, "crawl", move |_, ctx| async move {
            let report = crawler.crawl_pages(&ctx, range, skip_existing).await?;
            tracing::info!(?report, "Crawl finished");
            Ok(())
        })
    }

    /// Splits saved Gooood pages into project folders
    ///
    /// # Errors
    ///
    /// Errors if the task is refused or the http client cannot be built.
    pub fn run_gooood_init(self: &Arc<Self>, skip_existing: bool) -> Result<Arc<TaskContext>> {
        let crawler = GoooodCrawler::from_settings(&self.settings)?;

        self.start(Source::Gooood, "init", move |_, ctx| async move {
            let report = crawler.init_projects(&ctx, skip_existing).await?;
            tracing::info!(?report, "Project folders initialised");
            Ok(())
        })
    }

    /// Generates a proposal grounded in the ArchDaily projects, outside the task registry.
    ///
    /// # Errors
    ///
    /// Errors if the database cannot be reached or the chat model fails.
    pub async fn generate_proposal(&self, requirement: &str) -> Result<Proposal> {
        let stores = self.stores(Source::Archdaily).await?;
        let retriever =
            Retriever::new(self.embedding_model(EmbedBackend::Remote), stores.embeddings);

        ProposalGenerator::builder()
            .chat(CompatibleModel::remote(&self.settings))
            .retriever(retriever)
            .build()?
            .generate_proposal(requirement)
            .await
    }

    /// Stops every running task and saves the invalid-id set
    ///
    /// # Errors
    ///
    /// Errors if the invalid-id set cannot be saved.
    pub async fn shutdown(&self) -> Result<()> {
        self.registry.stop_all().await;
        self.invalid_ids.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archscout_core::TaskStartError;
    use pretty_assertions::assert_eq;
    use temp_dir::TempDir;

    async fn app(root: &TempDir) -> Arc<AppContext> {
        let settings = Settings::builder()
            .projects_dir(root.child("archdaily"))
            .gooood_projects_dir(root.child("gooood"))
            .invalid_project_ids_path(root.child("invalid_ids.json"))
            .build()
            .unwrap();
        AppContext::new(settings).await.unwrap()
    }

    #[test]
    fn test_task_names() {
        assert_eq!(task_name(Source::Archdaily, "fetch"), "archdaily-fetch");
        assert_eq!(task_name(Source::Gooood, "embed_local"), "gooood-embed_local");
    }

    #[test_log::test(tokio::test)]
    async fn test_scan_fills_queue() {
        let root = TempDir::new().unwrap();
        let app = app(&root).await;

        let ctx = app
            .run_scan(Source::Archdaily, ScanMode::IdRange { start: 3, end: 1 })
            .unwrap();
        ctx.wait().await;

        let queue: Vec<String> = app.queue().await.iter().map(ToString::to_string).collect();
        assert_eq!(queue, vec!["3", "2", "1"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_queue_stage_refused_after_other_source() {
        let root = TempDir::new().unwrap();
        let app = app(&root).await;

        app.run_scan(Source::Gooood, ScanMode::MissingRawContent)
            .unwrap()
            .wait()
            .await;

        let error = app.run_fetch().unwrap_err();
        assert!(matches!(
            error.downcast_ref::<TaskStartError>(),
            Some(TaskStartError::ScopeMismatch { .. })
        ));
    }

    #[test_log::test(tokio::test)]
    async fn test_remote_embed_requires_keys() {
        let root = TempDir::new().unwrap();
        let app = app(&root).await;
        app.set_queue(vec!["1".into()]).await;

        assert!(app.run_embed(Source::Archdaily, EmbedBackend::Remote).is_err());
        assert_eq!(app.queue().await.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_injected_stores_are_used() {
        let root = TempDir::new().unwrap();
        let app = app(&root).await;
        app.with_stores(Source::Gooood, Stores::in_memory()).await;

        let stores = app.stores(Source::Gooood).await.unwrap();
        assert!(!stores.contents.contains(&"1".into()).await.unwrap());
    }
}
