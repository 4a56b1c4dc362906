//! Integration tests for crawl sessions and the task scheduler
//!
//! These tests use wiremock to serve pages, media and webhooks, and run the
//! whole stack: pool of HTTP engines, orchestrator, media pipeline and
//! scheduler.

use harvester::browser::{build_http_client, BrowserPool, HttpLauncher, NavigateOptions, PoolConfig};
use harvester::config::{parse_config, UserAgentConfig};
use harvester::crawler::{CrawlRequest, CrawlSettings, Orchestrator};
use harvester::media::{MediaOptions, MediaType, MediaTypeConfig};
use harvester::scheduler::{
    BatchCrawlRequest, NewTask, SchedulerConfig, SessionBatchCrawler, TaskScheduler, WebhookNotifier,
};
use harvester::state::{SessionStatus, TaskStatus};
use harvester::storage::{self, paths, shared, MemoryObjectStore, MemoryStore, SharedMetadataStore, SqliteStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BUCKET: &str = "test-bucket";

fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestHarvester".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

struct Stack {
    orchestrator: Orchestrator,
    objects: Arc<MemoryObjectStore>,
    metadata: SharedMetadataStore,
    pool: BrowserPool,
}

async fn stack_with_store(metadata: SharedMetadataStore) -> Stack {
    let pool = BrowserPool::start(
        PoolConfig {
            min_browsers: 1,
            max_browsers: 2,
            acquire_timeout: Duration::from_secs(5),
        },
        Arc::new(HttpLauncher::new(user_agent())),
    )
    .await
    .expect("pool starts");

    let objects = Arc::new(MemoryObjectStore::new());
    let orchestrator = Orchestrator::new(
        pool.clone(),
        build_http_client(&user_agent()).expect("client builds"),
        objects.clone(),
        BUCKET,
        metadata.clone(),
        NavigateOptions {
            timeout: Duration::from_secs(5),
        },
    );

    Stack {
        orchestrator,
        objects,
        metadata,
        pool,
    }
}

async fn stack() -> Stack {
    stack_with_store(shared(MemoryStore::new())).await
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html(body))
        .mount(server)
        .await;
}

fn image_settings(max_file_size_mb: u64) -> CrawlSettings {
    CrawlSettings {
        media_options: Some(MediaOptions {
            enabled: true,
            media_types: vec![MediaTypeConfig::inherit(MediaType::Image)],
            max_file_size: Some(max_file_size_mb),
            download_timeout: Some(5),
            concurrent: Some(2),
        }),
        ..CrawlSettings::default()
    }
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(
        &server,
        "/",
        format!(
            r#"<html><head><title>Home</title></head><body>
            <a href="{base}/page1">Page 1</a>
            <a href="/page2">Page 2</a>
            <a href="/missing">Broken</a>
            <a href="https://elsewhere.example.org/">Elsewhere</a>
            </body></html>"#
        ),
    )
    .await;
    mount_page(
        &server,
        "/page1",
        format!(r#"<html><head><title>Page 1</title></head><body><a href="{base}/">Home</a></body></html>"#),
    )
    .await;
    mount_page(
        &server,
        "/page2",
        r#"<html><head><title>Page 2</title></head><body>Content 2</body></html>"#.to_string(),
    )
    .await;

    let stack = stack().await;
    let session = stack
        .orchestrator
        .run_to_completion(CrawlRequest::new(format!("{}/", base)))
        .await
        .expect("request is valid");

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.pages_processed, 3);
    assert_eq!(session.total_pages, 3);
    assert_eq!(session.errors.len(), 1);
    assert!(session.errors[0].contains("/missing"), "{:?}", session.errors);

    let page_records: Vec<String> = stack
        .objects
        .keys(BUCKET, "domain/127.0.0.1/")
        .into_iter()
        .filter(|k| k.contains("/pages/") && k.ends_with(".json"))
        .collect();
    assert_eq!(page_records.len(), 3);

    let record = stack.objects.object(BUCKET, &page_records[0]).unwrap();
    let document: serde_json::Value = serde_json::from_slice(&record.bytes).unwrap();
    assert!(document["metadata"]["statusCode"].is_number());

    let summary = storage::lock(&stack.metadata)
        .get_session(&session.id)
        .unwrap()
        .expect("session summary persisted");
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.pages_processed, 3);
    assert_eq!(summary.error_count, 1);

    stack.pool.shutdown().await;
}

#[tokio::test]
async fn test_media_with_identical_bytes_is_stored_once() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/",
        r#"<html><body><img src="/a.png"><img src="/b.png"></body></html>"#.to_string(),
    )
    .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    for image in ["/a.png", "/b.png"] {
        Mock::given(method("GET"))
            .and(path(image))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"\x89PNG same bytes".to_vec())
                    .insert_header("content-type", "image/png"),
            )
            .mount(&server)
            .await;
    }

    let stack = stack().await;
    let session = stack
        .orchestrator
        .run_to_completion(CrawlRequest::with_settings(format!("{}/", server.uri()), image_settings(5)))
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.errors.is_empty(), "{:?}", session.errors);

    let files = stack.orchestrator.catalog().files(&session.id);
    assert_eq!(files.len(), 2);
    assert_ne!(files[0].url, files[1].url);
    assert!(files[0].storage_path.is_some());
    assert_eq!(files[0].storage_path, files[1].storage_path);
    assert_eq!(files[0].content_hash, files[1].content_hash);

    let stored = stack
        .objects
        .keys(BUCKET, &paths::session_media_prefix(&session.id));
    assert_eq!(stored.len(), 1);

    stack.pool.shutdown().await;
}

#[tokio::test]
async fn test_oversized_media_is_never_transferred() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/",
        r#"<html><body><img src="/big.png"></body></html>"#.to_string(),
    )
    .await;

    // 2 MB declared by the probe, over the 1 MB ceiling
    Mock::given(method("HEAD"))
        .and(path("/big.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 2 * 1024 * 1024])
                .insert_header("content-type", "image/png"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/big.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
        .expect(0)
        .mount(&server)
        .await;

    let stack = stack().await;
    let session = stack
        .orchestrator
        .run_to_completion(CrawlRequest::with_settings(format!("{}/", server.uri()), image_settings(1)))
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.pages_processed, 1);
    assert_eq!(session.errors.len(), 1);
    assert!(session.errors[0].contains("too large"), "{:?}", session.errors);
    assert!(stack.orchestrator.catalog().files(&session.id).is_empty());

    stack.pool.shutdown().await;
}

fn scheduler_for(stack: &Stack) -> TaskScheduler {
    TaskScheduler::new(
        SchedulerConfig {
            max_concurrent_tasks: 2,
            retry_delay: Duration::from_millis(10),
            tick_interval: Duration::from_secs(60),
        },
        Arc::new(SessionBatchCrawler::new(stack.orchestrator.clone())),
        Arc::new(WebhookNotifier::new(reqwest::Client::new())),
        stack.metadata.clone(),
    )
}

fn quick_batch(urls: Vec<String>) -> BatchCrawlRequest {
    let mut request = BatchCrawlRequest::new(urls);
    request.options.delay = 0;
    request.options.retries = 0;
    request
}

#[tokio::test]
async fn test_scheduled_task_reports_to_webhook() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/", r#"<html><body><a href="/about">About</a></body></html>"#.to_string()).await;
    mount_page(&server, "/about", "<html><body>About</body></html>".to_string()).await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(json!({ "status": "completed", "retryCount": 0 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let stack = stack().await;
    let scheduler = scheduler_for(&stack);

    let task = scheduler
        .create_task(NewTask {
            webhook: Some(format!("{}/hook", base)),
            ..NewTask::new("site", quick_batch(vec![format!("{}/", base), format!("{}/#top", base)]))
        })
        .unwrap();
    scheduler.wait_until_settled().await;

    let finished = scheduler.get_task(&task.id).unwrap();
    assert_eq!(finished.status, TaskStatus::Completed);
    assert!(finished.last_run.is_some());

    let history = storage::lock(&stack.metadata).get_executions(&task.id).unwrap();
    assert_eq!(history.len(), 1);
    let batch = history[0].result.as_ref().expect("batch result recorded");
    assert_eq!(batch.total_urls, 2);
    assert_eq!(batch.results.len(), 1, "fragment duplicate is dropped");
    assert_eq!(batch.success_count, 1);
    assert_eq!(batch.results[0].pages_processed, 2);
    assert_eq!(batch.results[0].quality_score, Some(100.0));

    stack.pool.shutdown().await;
}

#[tokio::test]
async fn test_failing_task_exhausts_retries() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let stack = stack().await;
    let scheduler = scheduler_for(&stack);

    let task = scheduler
        .create_task(NewTask {
            max_retries: 1,
            webhook: Some(format!("{}/hook", base)),
            ..NewTask::new("broken", quick_batch(vec![format!("{}/gone", base)]))
        })
        .unwrap();
    scheduler.wait_until_settled().await;

    let finished = scheduler.get_task(&task.id).unwrap();
    assert_eq!(finished.status, TaskStatus::Failed);
    assert_eq!(finished.retry_count, 2);

    let history = storage::lock(&stack.metadata).get_executions(&task.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, TaskStatus::Pending);
    assert_eq!(history[1].status, TaskStatus::Failed);
    assert!(history[1].error.as_deref().unwrap().contains("All 1 URLs failed"));

    let stats = scheduler.get_stats();
    assert_eq!(stats.failed_tasks, 1);
    assert_eq!(stats.success_rate, 0.0);

    stack.pool.shutdown().await;
}

#[tokio::test]
async fn test_tasks_survive_restart_in_sqlite() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "<html><body>Home</body></html>".to_string()).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("harvester.db");

    let task_id = {
        let stack = stack_with_store(shared(SqliteStore::new(&db_path).unwrap())).await;
        let scheduler = scheduler_for(&stack);
        let task = scheduler
            .create_task(NewTask::new("persisted", quick_batch(vec![format!("{}/", server.uri())])))
            .unwrap();
        scheduler.wait_until_settled().await;
        stack.pool.shutdown().await;
        task.id
    };

    let stack = stack_with_store(shared(SqliteStore::new(&db_path).unwrap())).await;
    let scheduler = scheduler_for(&stack);
    assert_eq!(scheduler.load_from_store().unwrap(), 1);

    let restored = scheduler.get_task(&task_id).unwrap();
    assert_eq!(restored.status, TaskStatus::Completed);
    assert_eq!(restored.name, "persisted");
    assert_eq!(
        storage::lock(&stack.metadata).get_executions(&task_id).unwrap().len(),
        1
    );

    stack.pool.shutdown().await;
}

#[tokio::test]
async fn test_configured_task_runs() {
    let server = MockServer::start().await;
    mount_page(&server, "/docs", "<html><body>Docs</body></html>".to_string()).await;

    let config = parse_config(&format!(
        r#"
[user-agent]
crawler-name = "TestHarvester"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[[task]]
name = "docs"
urls = ["{}/docs"]
priority = 4

[task.crawl]
max-pages = 1

[task.batch]
delay = 0
retries = 0
"#,
        server.uri()
    ))
    .unwrap();

    let stack = stack().await;
    let scheduler = scheduler_for(&stack);
    let task = scheduler
        .create_task(config.tasks[0].to_new_task().unwrap())
        .unwrap();
    assert_eq!(task.priority, 4);
    assert_eq!(task.request.config.max_pages, 1);

    scheduler.wait_until_settled().await;
    assert_eq!(scheduler.get_task(&task.id).unwrap().status, TaskStatus::Completed);

    stack.pool.shutdown().await;
}
