//! Runs an ArchDaily project from id range to stored embeddings against mocked site and model
//! servers.
use archscout::ingest::ScanMode;
use archscout::ingest::persist::{MemoryContentStore, MemoryEmbeddingStore};
use archscout::{
    AppContext, ContentStore as _, EmbedBackend, ForceUpdate, ProjectId, Settings, Source, Stores,
};
use indoc::formatdoc;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use temp_dir::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_site(server: &MockServer) {
    let page = formatdoc! {r#"
        <html><body>
          <header class="article-header"><h1>Lake Tea House</h1></header>
          <ul class="gallery-thumbs"><li><a class="gallery-thumbs-link" href="/1/gallery">1</a></li></ul>
          <article>
            <p>The tea house sits on a timber deck above the lake.</p>
            <p>A sunken courtyard gathers rain water from the roof.</p>
          </article>
          <div class="afd-tags__container"><a class="afd-tags__btn">Tea House</a></div>
        </body></html>
    "#};
    let gallery = format!(
        r#"<div id="gallery-items" class="afd-gal-items" data-images='[{{"url_large":"{}/img/1.jpg"}}]'></div>"#,
        server.uri()
    );

    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/gallery"))
        .respond_with(ResponseTemplate::new(200).set_body_string(gallery))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xd8, 0xff]))
        .expect(1)
        .mount(server)
        .await;
}

async fn mock_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [0.6, 0.8], "index": 0, "object": "embedding"}],
            "model": "text-embedding-v3",
            "object": "list",
            "usage": {"prompt_tokens": 8, "total_tokens": 8}
        })))
        .mount(server)
        .await;
}

#[test_log::test(tokio::test)]
async fn test_archdaily_pipeline() {
    let site = MockServer::start().await;
    let models = MockServer::start().await;
    mock_site(&site).await;
    mock_embeddings(&models).await;

    let root = TempDir::new().unwrap();
    let settings = Settings::builder()
        .archdaily_base_url(format!("{}/", site.uri()))
        .projects_dir(root.child("projects"))
        .invalid_project_ids_path(root.child("invalid_ids.json"))
        .politeness_delay_ms(0_u64)
        .model_api_base(models.uri())
        .api_keys(vec![SecretString::from("sk-1")])
        .min_request_interval_ms(0_u64)
        .build()
        .unwrap();

    let app = AppContext::new(settings).await.unwrap();
    let contents = MemoryContentStore::default();
    let embeddings = MemoryEmbeddingStore::default();
    app.with_stores(
        Source::Archdaily,
        Stores::new(contents.clone(), embeddings.clone()),
    )
    .await;

    app.run_scan(Source::Archdaily, ScanMode::IdRange { start: 1, end: 2 })
        .unwrap()
        .wait()
        .await;
    assert_eq!(app.queue().await.len(), 2);

    let fetch = app.run_fetch().unwrap();
    fetch.wait().await;
    assert_eq!(fetch.success_projects(), vec![ProjectId::from("1")]);
    assert!(app.invalid_ids().contains(&"2".into()));
    assert!(app.queue().await.is_empty());

    app.run_scan(
        Source::Archdaily,
        ScanMode::PendingParse { skip_parsed: false },
    )
    .unwrap()
    .wait()
    .await;
    app.run_parse(Source::Archdaily, ForceUpdate::none(), false)
        .unwrap()
        .wait()
        .await;

    let record: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(root.child("projects/1/content.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(record["title"], json!("Lake Tea House"));
    assert_eq!(record["tags"], json!(["Tea House"]));
    assert_eq!(
        record["image_gallery"][0]["url_large"],
        json!(format!("{}/img/1.jpg", site.uri()))
    );

    app.run_scan(
        Source::Archdaily,
        ScanMode::PendingImages {
            size: "large".into(),
        },
    )
    .unwrap()
    .wait()
    .await;
    app.run_download(Source::Archdaily).unwrap().wait().await;
    let layout = app.settings().layout(Source::Archdaily);
    assert!(layout.image_path(&"1".into(), "large", 0).exists());

    app.run_upload(Source::Archdaily, false)
        .unwrap()
        .wait()
        .await;
    assert!(contents.contains(&"1".into()).await.unwrap());

    app.run_embedding_scan(Source::Archdaily, false)
        .unwrap()
        .wait()
        .await;
    assert_eq!(app.queue().await, vec![ProjectId::from("1")]);

    let embed = app
        .run_embed(Source::Archdaily, EmbedBackend::Remote)
        .unwrap();
    embed.wait().await;
    assert_eq!(embed.success_projects(), vec![ProjectId::from("1")]);

    let chunks = embeddings.chunks_of(&"1".into()).await;
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|chunk| chunk.embedding == vec![0.6_f32, 0.8]));
}
