use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use rivalwatch::firecrawl::{FirecrawlClient, ScrapeConfig, ScrapeError, ScrapeOptions};

/// Serves `router` on an ephemeral port and returns the crawl endpoint URL.
async fn spawn_service(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/v1/crawl", addr)
}

fn fast_config(endpoint: String) -> ScrapeConfig {
    ScrapeConfig {
        endpoint,
        request_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(50),
        poll_request_timeout: Duration::from_secs(2),
        max_wait: Duration::from_secs(5),
        max_retries: 2,
        backoff_base: Duration::from_millis(10),
    }
}

fn client_for(endpoint: String) -> FirecrawlClient {
    FirecrawlClient::new(fast_config(endpoint)).unwrap()
}

#[tokio::test]
async fn test_synchronous_result() {
    let router = Router::new().route(
        "/v1/crawl",
        post(|| async {
            Json(json!({
                "success": true,
                "data": {
                    "markdown": "# Acme opens Pune hub",
                    "metadata": {"title": "Acme news"}
                }
            }))
        }),
    );
    let client = client_for(spawn_service(router).await);

    let page = client
        .scrape("https://acme.test/news", &ScrapeOptions::default())
        .await
        .unwrap();
    assert_eq!(page.markdown, "# Acme opens Pune hub");
    assert_eq!(page.title.as_deref(), Some("Acme news"));
    assert_eq!(page.status_code, 200);
    assert!(page.job_id.is_none());
}

#[tokio::test]
async fn test_job_is_polled_until_completed() {
    let polls = Arc::new(AtomicUsize::new(0));
    let poll_counter = polls.clone();

    let router = Router::new()
        .route(
            "/v1/crawl",
            post(|| async { Json(json!({"success": true, "id": "job-1"})) }),
        )
        .route(
            "/v1/crawl/{id}",
            get(move || {
                let polls = poll_counter.clone();
                async move {
                    if polls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Json(json!({"status": "scraping"}))
                    } else {
                        Json(json!({
                            "status": "completed",
                            "data": [{"markdown": "Acme is hiring drivers"}]
                        }))
                    }
                }
            }),
        );
    let client = client_for(spawn_service(router).await);

    let page = client
        .scrape("https://acme.test/careers", &ScrapeOptions::default())
        .await
        .unwrap();
    assert_eq!(page.markdown, "Acme is hiring drivers");
    assert_eq!(page.job_id.as_deref(), Some("job-1"));
    assert_eq!(polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_blank_markdown_is_empty_content() {
    let router = Router::new().route(
        "/v1/crawl",
        post(|| async { Json(json!({"success": true, "data": {"markdown": "   ", "html": ""}})) }),
    );
    let client = client_for(spawn_service(router).await);

    let failure = client
        .scrape("https://acme.test/blocked", &ScrapeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(failure.error, ScrapeError::EmptyContent);
    assert_eq!(failure.attempts, 1);
    assert!(failure.response_body.is_some());
}

#[tokio::test]
async fn test_failed_job() {
    let router = Router::new()
        .route("/v1/crawl", post(|| async { Json(json!({"id": "job-9"})) }))
        .route(
            "/v1/crawl/{id}",
            get(|| async { Json(json!({"status": "failed", "error": "robots.txt disallows"})) }),
        );
    let client = client_for(spawn_service(router).await);

    let failure = client
        .scrape("https://acme.test/private", &ScrapeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(failure.error, ScrapeError::JobFailed("robots.txt disallows".to_string()));
    assert_eq!(failure.attempts, 1);
}

#[tokio::test]
async fn test_polling_stops_at_max_wait() {
    let router = Router::new()
        .route("/v1/crawl", post(|| async { Json(json!({"id": "slow"})) }))
        .route("/v1/crawl/{id}", get(|| async { Json(json!({"status": "scraping"})) }));
    let mut config = fast_config(spawn_service(router).await);
    config.max_wait = Duration::from_millis(600);
    config.poll_interval = Duration::from_millis(200);
    let client = FirecrawlClient::new(config).unwrap();

    let started = Instant::now();
    let failure = client
        .scrape("https://acme.test/slow", &ScrapeOptions::default())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    match failure.error {
        ScrapeError::JobTimeout { job_id, waited_ms } => {
            assert_eq!(job_id, "slow");
            assert!(waited_ms >= 600);
        }
        other => panic!("expected job timeout, got {:?}", other),
    }
    assert_eq!(failure.attempts, 1);
    assert!(elapsed >= Duration::from_millis(600));
    assert!(elapsed < Duration::from_secs(3), "polling overran: {:?}", elapsed);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let router = Router::new().route(
        "/v1/crawl",
        post(move || {
            let hits = counter.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
            }
        }),
    );
    let client = client_for(spawn_service(router).await);

    let failure = client
        .scrape("https://acme.test/", &ScrapeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.status_code, 503);
    assert!(matches!(failure.error, ScrapeError::Server { status: 503, .. }));
    assert_eq!(failure.response_body.as_deref(), Some("overloaded"));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let router = Router::new().route(
        "/v1/crawl",
        post(move || {
            let hits = counter.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid url")
            }
        }),
    );
    let client = client_for(spawn_service(router).await);

    let failure = client
        .scrape("not a url", &ScrapeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(failure.attempts, 1);
    assert_eq!(
        failure.error,
        ScrapeError::Client {
            status: 422,
            message: "invalid url".to_string()
        }
    );
}

#[tokio::test]
async fn test_unreachable_service_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(format!("http://{}/v1/crawl", addr));
    let failure = client
        .scrape("https://acme.test/", &ScrapeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ScrapeError::Transport(_)));
    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.status_code, 0);
}

#[tokio::test]
async fn test_unrecognised_response() {
    let router = Router::new().route("/v1/crawl", post(|| async { Json(json!({"ok": 1})) }));
    let client = client_for(spawn_service(router).await);

    let failure = client
        .scrape("https://acme.test/", &ScrapeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ScrapeError::Client { status: 200, .. }));
    assert_eq!(failure.attempts, 1);
}

#[tokio::test]
async fn test_hanging_poll_is_cut_at_max_wait() {
    let router = Router::new()
        .route("/v1/crawl", post(|| async { Json(json!({"id": "hang"})) }))
        .route(
            "/v1/crawl/{id}",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(json!({"status": "completed", "data": {"markdown": "too late"}}))
            }),
        );
    let mut config = fast_config(spawn_service(router).await);
    config.max_wait = Duration::from_millis(500);
    config.poll_interval = Duration::from_millis(200);
    config.poll_request_timeout = Duration::from_secs(3);
    config.max_retries = 0;
    let client = FirecrawlClient::new(config).unwrap();

    let started = Instant::now();
    let failure = client
        .scrape("https://acme.test/hang", &ScrapeOptions::default())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(failure.error, ScrapeError::JobTimeout { .. }));
    // One poll interval of slack at most, plus scheduling noise.
    assert!(elapsed < Duration::from_millis(1200), "polling overran: {:?}", elapsed);
}

#[tokio::test]
async fn test_timed_out_poll_keeps_polling() {
    let polls = Arc::new(AtomicUsize::new(0));
    let poll_counter = polls.clone();

    let router = Router::new()
        .route("/v1/crawl", post(|| async { Json(json!({"id": "slow-poll"})) }))
        .route(
            "/v1/crawl/{id}",
            get(move || {
                let polls = poll_counter.clone();
                async move {
                    if polls.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Json(json!({"status": "scraping"}))
                    } else {
                        Json(json!({"status": "done", "data": {"markdown": "ok"}}))
                    }
                }
            }),
        );
    let mut config = fast_config(spawn_service(router).await);
    config.poll_request_timeout = Duration::from_millis(300);
    let client = FirecrawlClient::new(config).unwrap();

    let page = client
        .scrape("https://acme.test/slow-poll", &ScrapeOptions::default())
        .await
        .unwrap();
    assert_eq!(page.markdown, "ok");
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_poll_url_retries_submission() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let poll_url = format!("http://{}/v1/crawl/lost", closed.local_addr().unwrap());
    drop(closed);

    let submits = Arc::new(AtomicUsize::new(0));
    let counter = submits.clone();
    let router = Router::new().route(
        "/v1/crawl",
        post(move || {
            let submits = counter.clone();
            let poll_url = poll_url.clone();
            async move {
                submits.fetch_add(1, Ordering::SeqCst);
                Json(json!({"success": true, "id": "lost", "url": poll_url}))
            }
        }),
    );
    let client = client_for(spawn_service(router).await);

    let failure = client
        .scrape("https://acme.test/", &ScrapeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ScrapeError::Transport(_)));
    assert_eq!(failure.attempts, 3);
    assert_eq!(submits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_scrape_many_keeps_order_and_spacing() {
    let router = Router::new().route(
        "/v1/crawl",
        post(|Json(body): Json<serde_json::Value>| async move {
            let url = body["url"].as_str().unwrap_or_default().to_string();
            if url.ends_with("/missing") {
                (StatusCode::NOT_FOUND, Json(json!({"error": "gone"})))
            } else {
                (StatusCode::OK, Json(json!({"markdown": format!("content of {}", url)})))
            }
        }),
    );
    let client = client_for(spawn_service(router).await);

    let urls = vec![
        "https://acme.test/a".to_string(),
        "https://acme.test/missing".to_string(),
        "https://acme.test/b".to_string(),
    ];
    let started = Instant::now();
    let results = client
        .scrape_many(&urls, &ScrapeOptions::default(), Duration::from_millis(100))
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().markdown, "content of https://acme.test/a");
    let failure = results[1].as_ref().unwrap_err();
    assert_eq!(failure.url, "https://acme.test/missing");
    assert_eq!(failure.status_code, 404);
    assert_eq!(results[2].as_ref().unwrap().url, "https://acme.test/b");
    // Two gaps between three requests.
    assert!(started.elapsed() >= Duration::from_millis(200));
}
