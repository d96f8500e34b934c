//! Configuration types for the decoy endpoint.
//!
//! Every section has serde defaults so a partial config file works, and
//! the enumerated `DECOY_*` environment variables override whatever the
//! file supplied. The signing key is deliberately not part of the serde
//! surface; it is resolved separately so secret material never sits in a
//! config struct that gets serialized or logged.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoyConfig {
    /// Synthetic graph shape
    pub traversal: TraversalConfig,

    /// Rate limiting and hourly budgeting
    pub limits: LimitsConfig,

    /// Response shaping for high-score clients
    pub response: ResponseConfig,

    /// Telemetry store settings
    pub telemetry: TelemetryConfig,
}

/// Synthetic link-graph shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Maximum traversal depth; tokens at this depth are terminal.
    pub max_depth: u32,

    /// Child links embedded per non-terminal page.
    pub links_per_page: u32,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 12,
            links_per_page: 6,
        }
    }
}

/// Admission-control parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Token-bucket sustained rate (tokens/second).
    pub rate_per_second: f64,

    /// Token-bucket burst capacity.
    pub burst: u32,

    /// Per-client request ceiling per hour bucket.
    pub hourly_budget: u32,

    /// Hard cap on clients tracked by each admission map.
    pub max_tracked_clients: usize,

    /// Idle seconds before a rate-limit bucket is swept.
    pub idle_timeout_seconds: u64,

    /// Sweep runs every this many admission checks.
    pub sweep_interval: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 2.0,
            burst: 10,
            hourly_budget: 120,
            max_tracked_clients: 10_000,
            idle_timeout_seconds: 3600,
            sweep_interval: 1024,
        }
    }
}

/// Latency injection for high-confidence automated clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Scores at or above this get a delayed response.
    pub delay_score_threshold: u8,

    /// Delay per score point in milliseconds.
    pub delay_per_point_ms: u64,

    /// Ceiling on the injected delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            delay_score_threshold: 6,
            delay_per_point_ms: 150,
            max_delay_ms: 1500,
        }
    }
}

/// Telemetry store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// SQLite database path.
    pub db_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            db_path: "decoy_telemetry.sqlite3".to_string(),
        }
    }
}

impl DecoyConfig {
    /// Apply `DECOY_*` environment overrides on top of this config.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override fields through a lookup function; unparsable values are
    /// logged and ignored so a typo cannot silently zero a limit.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_from(&lookup, "DECOY_MAX_DEPTH", &mut self.traversal.max_depth);
        override_from(
            &lookup,
            "DECOY_LINKS_PER_PAGE",
            &mut self.traversal.links_per_page,
        );
        override_from(
            &lookup,
            "DECOY_RATE_PER_SECOND",
            &mut self.limits.rate_per_second,
        );
        override_from(&lookup, "DECOY_BURST", &mut self.limits.burst);
        override_from(&lookup, "DECOY_HOURLY_BUDGET", &mut self.limits.hourly_budget);
        override_from(
            &lookup,
            "DECOY_MAX_DELAY_MS",
            &mut self.response.max_delay_ms,
        );
        if let Some(path) = lookup("DECOY_DB") {
            self.telemetry.db_path = path;
        }
    }
}

fn override_from<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(name) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!(var = name, value = %raw, "ignoring unparsable override"),
        }
    }
}

/// Resolved signing keys: the active key plus an optional rotation-window
/// key that is accepted for verification only.
pub struct SigningKeys {
    pub current: SecretString,
    pub previous: Option<SecretString>,
    /// True when no key was supplied and an ephemeral one was generated.
    pub generated: bool,
}

/// Resolve signing keys from `DECOY_SIGNING_KEY` /
/// `DECOY_PREVIOUS_SIGNING_KEY`, generating an ephemeral key when none is
/// supplied. Generated keys do not survive restarts, which invalidates
/// all outstanding tokens; the caller logs that condition.
pub fn resolve_signing_keys() -> SigningKeys {
    let supplied = std::env::var("DECOY_SIGNING_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty());
    let previous = std::env::var("DECOY_PREVIOUS_SIGNING_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from);

    match supplied {
        Some(key) => SigningKeys {
            current: SecretString::from(key),
            previous,
            generated: false,
        },
        None => SigningKeys {
            current: generate_key(),
            previous,
            generated: true,
        },
    }
}

fn generate_key() -> SecretString {
    let material: [u8; 32] = rand::random();
    SecretString::from(URL_SAFE_NO_PAD.encode(material))
}
