//! Integration tests for the decoy endpoint.
//!
//! These drive the full router with one-shot requests and verify the
//! external contract: admission control, token traversal, terminal
//! pages, invalid-token handling and telemetry rows.

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use decoy_endpoint::config::DecoyConfig;
use decoy_endpoint::server::{router, AppState};
use decoy_endpoint::telemetry::{SqliteTelemetry, TelemetrySink};
use decoy_endpoint::token::TokenCodec;
use http_body_util::BodyExt;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::util::ServiceExt;

const TEST_KEY: &str = "integration-signing-key";

/// Permissive defaults so traversal tests never trip admission control.
fn test_config() -> DecoyConfig {
    let mut config = DecoyConfig::default();
    config.limits.burst = 10_000;
    config.limits.hourly_budget = 100_000;
    config.response.max_delay_ms = 0;
    config
}

fn build_app(config: DecoyConfig, sink: Arc<dyn TelemetrySink>) -> Router {
    let codec = TokenCodec::new(SecretString::from(TEST_KEY));
    let state = Arc::new(AppState::new(&config, codec, sink));
    router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 43210))))
}

fn app_with_memory_store(config: DecoyConfig) -> Router {
    build_app(config, Arc::new(SqliteTelemetry::open_in_memory().unwrap()))
}

/// Browser-looking GET so the score stays below the delay threshold.
fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0")
        .header(header::ACCEPT, "text/html,application/xhtml+xml")
        .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
        .body(Body::empty())
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Pull honey tokens out of a page: hrefs whose target contains the
/// payload/signature separator.
fn extract_tokens(html: &str) -> Vec<String> {
    html.split("href=\"/")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .filter(|target| target.contains('.'))
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Root endpoint
// =============================================================================

#[tokio::test]
async fn test_root_page_carries_exactly_one_token() {
    let app = app_with_memory_store(test_config());
    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let html = body_text(response).await;
    let tokens = extract_tokens(&html);
    assert_eq!(tokens.len(), 1, "root page embeds exactly one honey link");

    let codec = TokenCodec::new(SecretString::from(TEST_KEY));
    let state = codec.decode(&tokens[0]).expect("root token verifies");
    assert_eq!(state.depth, 0);
    assert_eq!(state.index, 0);
    assert_eq!(state.chain, state.seed);
}

#[tokio::test]
async fn test_root_sets_exclusion_headers() {
    let app = app_with_memory_store(test_config());
    let response = app.oneshot(get("/")).await.unwrap();

    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    assert_eq!(
        response.headers().get("x-robots-tag").unwrap(),
        "noindex, nofollow, noarchive"
    );
    let html = body_text(response).await;
    assert!(html.contains("noindex,nofollow,noarchive"));
}

// =============================================================================
// Traversal
// =============================================================================

#[tokio::test]
async fn test_branch_pages_embed_configured_child_count() {
    let mut config = test_config();
    config.traversal.links_per_page = 6;
    let app = app_with_memory_store(config);

    let root_html = body_text(app.clone().oneshot(get("/")).await.unwrap()).await;
    let root_token = extract_tokens(&root_html).remove(0);

    let response = app
        .oneshot(get(&format!("/{root_token}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let tokens = extract_tokens(&body_text(response).await);
    assert_eq!(tokens.len(), 6);

    let codec = TokenCodec::new(SecretString::from(TEST_KEY));
    for token in &tokens {
        let child = codec.decode(token).expect("child tokens verify");
        assert_eq!(child.depth, 1);
    }
}

#[tokio::test]
async fn test_walk_reaches_terminal_at_max_depth() {
    let mut config = test_config();
    config.traversal.max_depth = 12;
    config.traversal.links_per_page = 3;
    let app = app_with_memory_store(config);

    let root_html = body_text(app.clone().oneshot(get("/")).await.unwrap()).await;
    let mut token = extract_tokens(&root_html).remove(0);

    // Depth 0 through 11 branch; the 12th followed link is terminal.
    for hop in 1..=12 {
        let response = app
            .clone()
            .oneshot(get(&format!("/{token}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let tokens = extract_tokens(&body_text(response).await);

        if hop < 12 {
            assert_eq!(tokens.len(), 3, "hop {hop} should branch");
            token = tokens.into_iter().next().unwrap();
        } else {
            assert!(tokens.is_empty(), "hop {hop} should be terminal");
        }
    }
}

#[tokio::test]
async fn test_traversal_is_deterministic_across_requests() {
    let app = app_with_memory_store(test_config());

    let root_html = body_text(app.clone().oneshot(get("/")).await.unwrap()).await;
    let token = extract_tokens(&root_html).remove(0);

    let first = body_text(
        app.clone()
            .oneshot(get(&format!("/{token}")))
            .await
            .unwrap(),
    )
    .await;
    let second = body_text(
        app.clone()
            .oneshot(get(&format!("/{token}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(extract_tokens(&first), extract_tokens(&second));
}

#[tokio::test]
async fn test_chain_extends_along_the_walk() {
    let app = app_with_memory_store(test_config());
    let codec = TokenCodec::new(SecretString::from(TEST_KEY));

    let root_html = body_text(app.clone().oneshot(get("/")).await.unwrap()).await;
    let root_token = extract_tokens(&root_html).remove(0);
    let root = codec.decode(&root_token).unwrap();

    let branch_html = body_text(
        app.oneshot(get(&format!("/{root_token}"))).await.unwrap(),
    )
    .await;
    for token in extract_tokens(&branch_html) {
        let child = codec.decode(&token).unwrap();
        assert!(child.chain.starts_with(&format!("{}/", root.chain)));
    }
}

// =============================================================================
// Invalid tokens
// =============================================================================

#[tokio::test]
async fn test_invalid_token_yields_400_and_telemetry_row() {
    let db = tempfile::NamedTempFile::new().unwrap();
    let sink = Arc::new(SqliteTelemetry::open(db.path()).unwrap());
    let app = build_app(test_config(), sink);

    let response = app
        .oneshot(get("/bm90LXJlYWw.bm90LXJlYWw"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The hit is recorded with sentinel traversal fields; invalid tokens
    // are signal, not noise.
    let conn = rusqlite::Connection::open(db.path()).unwrap();
    let (depth, chain, score): (i64, String, i64) = conn
        .query_row("SELECT depth, chain, score FROM hits", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap();
    assert_eq!(depth, -1);
    assert!(chain.is_empty());
    assert!((0..=10).contains(&score));
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let app = app_with_memory_store(test_config());

    let root_html = body_text(app.clone().oneshot(get("/")).await.unwrap()).await;
    let token = extract_tokens(&root_html).remove(0);

    let mut tampered = token.clone();
    tampered.pop();
    let response = app
        .oneshot(get(&format!("/{tampered}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_valid_hits_are_recorded() {
    let db = tempfile::NamedTempFile::new().unwrap();
    let sink = Arc::new(SqliteTelemetry::open(db.path()).unwrap());
    let app = build_app(test_config(), sink.clone());

    let root_html = body_text(app.clone().oneshot(get("/")).await.unwrap()).await;
    let token = extract_tokens(&root_html).remove(0);
    app.oneshot(get(&format!("/{token}"))).await.unwrap();

    assert_eq!(sink.hit_count().unwrap(), 1);
}

// =============================================================================
// Admission control
// =============================================================================

#[tokio::test]
async fn test_rate_limit_returns_429_after_burst() {
    let mut config = test_config();
    config.limits.burst = 3;
    config.limits.rate_per_second = 0.001;
    let app = app_with_memory_store(config);

    for i in 0..3 {
        let response = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {} admits", i + 1);
    }
    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rate_limit_keys_on_first_hop_address() {
    let mut config = test_config();
    config.limits.burst = 1;
    config.limits.rate_per_second = 0.001;
    let app = app_with_memory_store(config);

    let request = |ip: &str| {
        Request::builder()
            .uri("/")
            .header(header::USER_AGENT, "Mozilla/5.0 Firefox/121.0")
            .header(header::ACCEPT, "text/html")
            .header("x-forwarded-for", ip.to_string())
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(
        app.clone().oneshot(request("198.51.100.1")).await.unwrap().status(),
        StatusCode::OK
    );
    // A different first hop gets its own bucket.
    assert_eq!(
        app.clone().oneshot(request("198.51.100.2")).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.oneshot(request("198.51.100.1")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_hourly_budget_returns_429_and_counts_every_attempt() {
    let mut config = test_config();
    config.limits.hourly_budget = 2;
    let app = app_with_memory_store(config);

    assert_eq!(app.clone().oneshot(get("/")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(app.clone().oneshot(get("/")).await.unwrap().status(), StatusCode::OK);
    // The ceiling caps attempts, not admissions: every further call keeps
    // rejecting within the hour.
    for _ in 0..3 {
        assert_eq!(
            app.clone().oneshot(get("/")).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}

// =============================================================================
// Decoy routes and response shaping
// =============================================================================

#[tokio::test]
async fn test_status_and_docs_are_not_tokens() {
    let db = tempfile::NamedTempFile::new().unwrap();
    let sink = Arc::new(SqliteTelemetry::open(db.path()).unwrap());
    let app = build_app(test_config(), sink.clone());

    let response = app.clone().oneshot(get("/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let body = body_text(response).await;
    assert!(body.contains("\"ok\":true"));

    let response = app.clone().oneshot(get("/docs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Neither decoy route produces honeypot telemetry.
    assert_eq!(sink.hit_count().unwrap(), 0);
}

#[tokio::test]
async fn test_high_score_requests_are_delayed() {
    let mut config = test_config();
    config.response.delay_score_threshold = 1;
    config.response.delay_per_point_ms = 20;
    config.response.max_delay_ms = 100;
    let app = app_with_memory_store(config);

    // Bare request: no UA, no Accept, no cookies. Scores well above the
    // threshold, so the capped delay applies.
    let bare = Request::builder().uri("/x.y").body(Body::empty()).unwrap();
    let started = std::time::Instant::now();
    let response = app.oneshot(bare).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(
        elapsed >= std::time::Duration::from_millis(100),
        "expected injected delay, got {elapsed:?}"
    );
}
