//! Telemetry assembly and persistence.
//!
//! One [`HitRecord`] per honeypot request, including invalid-token
//! requests (those carry sentinel traversal fields; an invalid token is
//! signal, not noise). The SQLite sink holds a single pooled connection;
//! storage failures never reach the request path. They are logged and
//! counted on an observable fault channel instead, so sustained failures
//! stay visible without blocking responses.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::warn;

/// Depth recorded for requests whose token did not verify.
pub const INVALID_DEPTH: i64 = -1;

/// Schema for the telemetry store.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS hits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts REAL NOT NULL,
    client_ip TEXT,
    client_key TEXT,
    method TEXT,
    path TEXT,
    query TEXT,
    referer TEXT,
    user_agent TEXT,
    accept TEXT,
    accept_lang TEXT,
    accept_enc TEXT,
    connection TEXT,
    sec_ch_ua TEXT,
    sec_ch_platform TEXT,
    sec_fetch_site TEXT,
    sec_fetch_mode TEXT,
    sec_fetch_dest TEXT,
    cookies_present INTEGER,
    depth INTEGER,
    score INTEGER,
    chain TEXT,
    latency_ms INTEGER
);

CREATE INDEX IF NOT EXISTS idx_hits_ts ON hits(ts);
CREATE INDEX IF NOT EXISTS idx_hits_client_key ON hits(client_key);
CREATE INDEX IF NOT EXISTS idx_hits_path ON hits(path);
";

/// Errors from the telemetry store.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// One persisted telemetry row. Immutable once emitted.
#[derive(Debug, Clone)]
pub struct HitRecord {
    /// Unix seconds, fractional.
    pub ts: f64,
    pub client_ip: String,
    pub client_key: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub referer: String,
    pub user_agent: String,
    pub accept: String,
    pub accept_lang: String,
    pub accept_enc: String,
    pub connection: String,
    pub sec_ch_ua: String,
    pub sec_ch_platform: String,
    pub sec_fetch_site: String,
    pub sec_fetch_mode: String,
    pub sec_fetch_dest: String,
    pub cookies_present: bool,
    /// Traversal depth, or [`INVALID_DEPTH`] for unverifiable tokens.
    pub depth: i64,
    pub score: u8,
    pub chain: String,
    pub latency_ms: u64,
}

/// Where hit records go. The seam keeps the recorder testable without a
/// database and lets deployments swap the store.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, hit: &HitRecord) -> Result<(), TelemetryError>;
}

/// SQLite-backed sink with a single long-lived connection.
pub struct SqliteTelemetry {
    conn: Mutex<Connection>,
}

impl SqliteTelemetry {
    /// Open (or create) the store at `path` with WAL journaling.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, TelemetryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, TelemetryError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Total persisted rows.
    pub fn hit_count(&self) -> Result<u64, TelemetryError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM hits", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl TelemetrySink for SqliteTelemetry {
    fn record(&self, hit: &HitRecord) -> Result<(), TelemetryError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO hits (
                ts, client_ip, client_key, method, path, query, referer,
                user_agent, accept, accept_lang, accept_enc, connection,
                sec_ch_ua, sec_ch_platform, sec_fetch_site, sec_fetch_mode,
                sec_fetch_dest, cookies_present, depth, score, chain, latency_ms
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22
            )",
            params![
                hit.ts,
                hit.client_ip,
                hit.client_key,
                hit.method,
                hit.path,
                hit.query,
                hit.referer,
                hit.user_agent,
                hit.accept,
                hit.accept_lang,
                hit.accept_enc,
                hit.connection,
                hit.sec_ch_ua,
                hit.sec_ch_platform,
                hit.sec_fetch_site,
                hit.sec_fetch_mode,
                hit.sec_fetch_dest,
                hit.cookies_present as i64,
                hit.depth,
                i64::from(hit.score),
                hit.chain,
                hit.latency_ms as i64,
            ],
        )?;
        Ok(())
    }
}

/// Assembles and emits hit records, absorbing sink failures.
pub struct TelemetryRecorder {
    sink: Arc<dyn TelemetrySink>,
    dropped: AtomicU64,
}

impl TelemetryRecorder {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            dropped: AtomicU64::new(0),
        }
    }

    /// Persist one record. Failures are logged and counted, never
    /// propagated: the response must not stall or fail on telemetry.
    pub fn emit(&self, hit: &HitRecord) {
        if let Err(error) = self.sink.record(hit) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                client_key = %hit.client_key,
                path = %hit.path,
                dropped_total = dropped,
                error = %error,
                "telemetry record dropped"
            );
        }
    }

    /// Records lost to sink failures since startup.
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
