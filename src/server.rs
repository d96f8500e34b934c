//! HTTP surface for the decoy endpoint.
//!
//! Two routes carry the protocol: `/` mints a single root token and
//! `/{token}` walks the synthetic graph. `/status` and `/docs` are
//! plain decoys so the honey link sits among normal-looking paths.
//! Every handler runs the same pipeline: admission (rate limit, then
//! hourly budget), token verification, scoring, child derivation,
//! telemetry.

use crate::budget::BudgetTracker;
use crate::client_key::{first_hop_ip, ClientKey};
use crate::config::{DecoyConfig, ResponseConfig};
use crate::limiter::{unix_now_secs, RateLimiter};
use crate::score::{BotScorer, RequestSignals, ScoreBreakdown};
use crate::telemetry::{HitRecord, TelemetryRecorder, TelemetrySink, INVALID_DEPTH};
use crate::token::{TokenCodec, TraversalState};
use crate::traversal::TraversalGenerator;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Product name advertised in the `Server` header.
const SERVER_NAME: &str = "decoy-endpoint";

/// Shared per-process state behind the handlers.
pub struct AppState {
    codec: Arc<TokenCodec>,
    generator: TraversalGenerator,
    limiter: RateLimiter,
    budget: BudgetTracker,
    scorer: BotScorer,
    recorder: TelemetryRecorder,
    response: ResponseConfig,
}

impl AppState {
    /// Wire all components from configuration, a codec and a sink.
    pub fn new(config: &DecoyConfig, codec: TokenCodec, sink: Arc<dyn TelemetrySink>) -> Self {
        let codec = Arc::new(codec);
        Self {
            generator: TraversalGenerator::new(
                Arc::clone(&codec),
                config.traversal.max_depth,
                config.traversal.links_per_page,
            ),
            codec,
            limiter: RateLimiter::new(
                config.limits.rate_per_second,
                config.limits.burst,
                config.limits.max_tracked_clients,
                config.limits.idle_timeout_seconds,
                config.limits.sweep_interval,
            ),
            budget: BudgetTracker::new(
                config.limits.hourly_budget,
                config.limits.max_tracked_clients,
                config.limits.sweep_interval,
            ),
            scorer: BotScorer::new(),
            recorder: TelemetryRecorder::new(sink),
            response: config.response.clone(),
        }
    }

    /// Records lost to telemetry failures since startup.
    pub fn dropped_records(&self) -> u64 {
        self.recorder.dropped_records()
    }
}

/// Build the router. Static routes take precedence over the token
/// capture, so `/status` and `/docs` never parse as tokens.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/docs", get(docs))
        .route("/{token}", get(follow))
        .with_state(state)
}

/// `GET /`: admission, then a page carrying exactly one root token.
async fn index(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let key = client_key(&headers, peer);
    if !state.limiter.admit(&key) {
        return throttled_page();
    }
    if !state.budget.consume(&key) {
        return budget_page();
    }

    let root = state.generator.root();
    let token = state.generator.token_for(&root);
    debug!(client_key = %key, seed = %root.seed, "minted root token");
    root_page(&token)
}

/// `GET /{token}`: the traversal endpoint. Invalid tokens still produce
/// a telemetry record with sentinel traversal fields.
async fn follow(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    method: Method,
    uri: Uri,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let key = client_key(&headers, peer);

    if !state.limiter.admit(&key) {
        return throttled_page();
    }
    if !state.budget.consume(&key) {
        return budget_page();
    }

    let decoded = state.codec.decode(&token);
    let breakdown = state.scorer.score(&signals_from(&headers));

    // Bounded latency injection for high-confidence automation. The
    // score never gates correctness; it only shapes timing here.
    if breakdown.score >= state.response.delay_score_threshold {
        let delay_ms = (state.response.delay_per_point_ms * u64::from(breakdown.score))
            .min(state.response.max_delay_ms);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    let latency_ms = started.elapsed().as_millis() as u64;
    let hit = assemble_hit(
        &headers,
        &key,
        &method,
        &uri,
        decoded.as_ref().ok(),
        &breakdown,
        latency_ms,
    );
    info!(
        client_key = %key,
        depth = hit.depth,
        score = breakdown.score,
        reasons = ?breakdown.reasons,
        latency_ms,
        valid = decoded.is_ok(),
        "honeypot hit"
    );
    state.recorder.emit(&hit);

    match decoded {
        Err(error) => {
            debug!(client_key = %key, error = %error, "rejected token");
            invalid_page()
        }
        Ok(position) if state.generator.is_terminal(&position) => terminal_page(position.depth),
        Ok(position) => {
            let children = state.generator.children(&position);
            branch_page(&position, &children, state.generator.max_depth())
        }
    }
}

/// `GET /status`: liveness decoy.
async fn status() -> Response {
    let mut response = Json(serde_json::json!({
        "ok": true,
        "ts": unix_now_secs(),
    }))
    .into_response();
    apply_common_headers(response.headers_mut());
    response
}

/// `GET /docs`: placeholder decoy.
async fn docs() -> Response {
    page(
        "Docs",
        "<p>Documentation placeholder.</p>\n    <p>If you are seeing this, you are likely not looking for real docs.</p>",
        StatusCode::OK,
    )
}

fn client_key(headers: &HeaderMap, peer: SocketAddr) -> ClientKey {
    let peer_ip = peer.ip().to_string();
    let ip = first_hop_ip(header_str(headers, "x-forwarded-for"), Some(&peer_ip));
    ClientKey::derive(&ip, header_str(headers, "user-agent").unwrap_or(""))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn header_owned(headers: &HeaderMap, name: &str) -> String {
    header_str(headers, name).unwrap_or("").to_string()
}

/// Extract what the scorer looks at. Header values that are not valid
/// UTF-8 count as absent.
fn signals_from(headers: &HeaderMap) -> RequestSignals {
    RequestSignals {
        user_agent: header_owned(headers, "user-agent"),
        accept: header_owned(headers, "accept"),
        accept_language: header_owned(headers, "accept-language"),
        has_client_hints: headers.contains_key("sec-ch-ua"),
        has_fetch_metadata: headers.contains_key("sec-fetch-mode"),
        has_cookies: headers
            .get(header::COOKIE)
            .is_some_and(|value| !value.is_empty()),
    }
}

fn assemble_hit(
    headers: &HeaderMap,
    key: &ClientKey,
    method: &Method,
    uri: &Uri,
    state: Option<&TraversalState>,
    breakdown: &ScoreBreakdown,
    latency_ms: u64,
) -> HitRecord {
    let (depth, chain) = match state {
        Some(state) => (i64::from(state.depth), state.chain.clone()),
        None => (INVALID_DEPTH, String::new()),
    };
    HitRecord {
        ts: unix_now_secs(),
        client_ip: key.ip.clone(),
        client_key: key.to_string(),
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or("").to_string(),
        referer: header_owned(headers, "referer"),
        user_agent: header_owned(headers, "user-agent"),
        accept: header_owned(headers, "accept"),
        accept_lang: header_owned(headers, "accept-language"),
        accept_enc: header_owned(headers, "accept-encoding"),
        connection: header_owned(headers, "connection"),
        sec_ch_ua: header_owned(headers, "sec-ch-ua"),
        sec_ch_platform: header_owned(headers, "sec-ch-ua-platform"),
        sec_fetch_site: header_owned(headers, "sec-fetch-site"),
        sec_fetch_mode: header_owned(headers, "sec-fetch-mode"),
        sec_fetch_dest: header_owned(headers, "sec-fetch-dest"),
        cookies_present: headers
            .get(header::COOKIE)
            .is_some_and(|value| !value.is_empty()),
        depth,
        score: breakdown.score,
        chain,
        latency_ms,
    }
}

// ---------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------

fn apply_common_headers(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        "x-robots-tag",
        HeaderValue::from_static("noindex, nofollow, noarchive"),
    );
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
}

/// Minimal HTML shell shared by every page. Never cached, never indexed.
fn page(title: &str, body: &str, status: StatusCode) -> Response {
    let html = format!(
        "<!doctype html>\n<html>\n  <head>\n    <meta charset=\"utf-8\">\n    \
         <meta name=\"robots\" content=\"noindex,nofollow,noarchive\">\n    \
         <title>{title}</title>\n  </head>\n  <body style=\"font-family: ui-monospace, monospace; padding: 1rem;\">\n    \
         <h1>{title}</h1>\n    {body}\n    <hr>\n    <small>ts={ts:.3}</small>\n  </body>\n</html>",
        ts = unix_now_secs(),
    );
    let mut response = (status, Html(html)).into_response();
    apply_common_headers(response.headers_mut());
    response
}

fn root_page(token: &str) -> Response {
    let body = format!(
        "<p>This is a decoy endpoint.</p>\n    <ul>\n      \
         <li><a href=\"/status\">/status</a></li>\n      \
         <li><a href=\"/docs\">/docs</a></li>\n      \
         <li><a href=\"/{token}\">/internal/metadata</a></li>\n    </ul>"
    );
    page("Index", &body, StatusCode::OK)
}

fn branch_page(state: &TraversalState, children: &[String], max_depth: u32) -> Response {
    let links: String = children
        .iter()
        .map(|token| {
            format!("<li><a href=\"/{token}\">node:{}</a></li>\n      ", &token_label(token))
        })
        .collect();
    let body = format!(
        "<p><b>Depth:</b> {depth} / {max_depth}</p>\n    <p><b>Node:</b> {seed}</p>\n    \
         <p><b>Hint:</b> If you are an automated client, this path is intentionally non-actionable.</p>\n    \
         <h3>Related</h3>\n    <ul>\n      {links}</ul>",
        depth = state.depth,
        seed = state.seed,
    );
    page("Internal metadata", &body, StatusCode::OK)
}

fn terminal_page(depth: u32) -> Response {
    let body = format!(
        "<p>Traversal ended (depth={depth}).</p>\n    \
         <p>If you are a human, there is nothing to do here.</p>"
    );
    page("Nothing here", &body, StatusCode::OK)
}

fn throttled_page() -> Response {
    page(
        "Slow down",
        "<p>Request rate limited.</p>",
        StatusCode::TOO_MANY_REQUESTS,
    )
}

fn budget_page() -> Response {
    page(
        "Budget exhausted",
        "<p>Client hourly budget exhausted.</p>",
        StatusCode::TOO_MANY_REQUESTS,
    )
}

fn invalid_page() -> Response {
    page("Invalid", "<p>Invalid token.</p>", StatusCode::BAD_REQUEST)
}

/// Short display label for a link: the first few payload chars.
fn token_label(token: &str) -> &str {
    let end = token.len().min(10);
    &token[..end]
}
