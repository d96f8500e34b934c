//! Decoy-endpoint service for crawler detection and profiling.
//!
//! Serves a synthetic link graph behind HMAC-signed traversal tokens and
//! records telemetry about whoever follows it.
//!
//! # Features
//!
//! - Stateless traversal tokens (the token is the session)
//! - Bounded, deterministic link-graph generation
//! - Per-client token-bucket rate limiting and hourly budgets
//! - Explainable bot-likelihood scoring from request attributes
//! - SQLite hit telemetry with a visible failure counter
//!
//! # Example
//!
//! ```ignore
//! use decoy_endpoint::config::DecoyConfig;
//! use decoy_endpoint::server::{router, AppState};
//! use decoy_endpoint::telemetry::SqliteTelemetry;
//! use decoy_endpoint::token::TokenCodec;
//!
//! let config = DecoyConfig::default();
//! let codec = TokenCodec::new(secrecy::SecretString::from("signing-key"));
//! let sink = std::sync::Arc::new(SqliteTelemetry::open("hits.sqlite3")?);
//! let state = std::sync::Arc::new(AppState::new(&config, codec, sink));
//! axum::serve(listener, router(state)).await?;
//! ```

pub mod budget;
pub mod client_key;
pub mod config;
pub mod limiter;
pub mod score;
pub mod server;
pub mod telemetry;
pub mod token;
pub mod traversal;

pub use budget::BudgetTracker;
pub use client_key::ClientKey;
pub use config::DecoyConfig;
pub use limiter::RateLimiter;
pub use score::{BotScorer, RequestSignals, ScoreBreakdown};
pub use server::{router, AppState};
pub use telemetry::{HitRecord, SqliteTelemetry, TelemetryRecorder, TelemetrySink};
pub use token::{TokenCodec, TokenError, TraversalState};
pub use traversal::TraversalGenerator;
