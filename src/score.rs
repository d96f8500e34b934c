//! Bot-likelihood scoring.
//!
//! A stateless additive rule table over request attributes:
//! - Scanner/library fingerprints in the User-Agent
//! - Missing headers real browsers always send
//! - Modern client-hint headers (reduce the score)
//! - Cookie absence
//!
//! Each rule contributes independently and the sum clamps to [0, 10], so
//! the scorer is trivially testable against literal header sets. The
//! output never gates correctness anywhere; it only shapes telemetry and
//! the optional response delay.

/// User-Agent substrings of common scanners, crawlers and HTTP libraries.
/// Matched case-insensitively.
pub const SCANNER_FINGERPRINTS: &[&str] = &[
    "nikto",
    "sqlmap",
    "acunetix",
    "nessus",
    "qualys",
    "openvas",
    "wpscan",
    "masscan",
    "nmap",
    "zaproxy",
    "burp",
    "curl",
    "python-requests",
    "go-http-client",
    "scrapy",
    "java/",
    "apache-httpclient",
    "libwww",
    "wget",
];

/// Scores above this clamp down; sums below zero clamp up.
pub const MAX_SCORE: u8 = 10;

/// Request attributes the scorer looks at.
///
/// Empty strings are treated the same as absent headers.
#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    /// A UA-structure client hint (`Sec-CH-UA`) was present.
    pub has_client_hints: bool,
    /// A fetch-context hint (`Sec-Fetch-Mode`) was present.
    pub has_fetch_metadata: bool,
    pub has_cookies: bool,
}

/// Score plus the rules that fired, so the result stays explainable.
#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    /// Bot likelihood in [0, 10].
    pub score: u8,
    pub reasons: Vec<&'static str>,
}

/// Stateless, side-effect-free scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct BotScorer;

impl BotScorer {
    pub fn new() -> Self {
        Self
    }

    /// Apply the rule table to one request's signals.
    pub fn score(&self, signals: &RequestSignals) -> ScoreBreakdown {
        let mut total: i32 = 0;
        let mut reasons = Vec::new();

        let ua_lower = signals.user_agent.to_lowercase();
        if SCANNER_FINGERPRINTS.iter().any(|m| ua_lower.contains(m)) {
            total += 4;
            reasons.push("scanner_fingerprint");
        }

        if signals.user_agent.is_empty() {
            total += 3;
            reasons.push("missing_user_agent");
        }
        if signals.accept.is_empty() {
            total += 2;
            reasons.push("missing_accept");
        }
        if signals.accept_language.is_empty() {
            total += 1;
            reasons.push("missing_accept_language");
        }

        if signals.has_client_hints {
            total -= 1;
            reasons.push("client_hints_present");
        }
        if signals.has_fetch_metadata {
            total -= 1;
            reasons.push("fetch_metadata_present");
        }

        if !signals.has_cookies {
            total += 1;
            reasons.push("no_cookies");
        }

        ScoreBreakdown {
            score: total.clamp(0, MAX_SCORE as i32) as u8,
            reasons,
        }
    }
}
