//! Per-client token-bucket admission control.
//!
//! One bucket per [`ClientKey`], refilled at a sustained rate up to a
//! burst capacity. Buckets live in a sharded map; the per-key entry guard
//! makes refill + check + decrement a single atomic unit, so two
//! concurrent admissions for the same key can never both spend the last
//! token.
//!
//! The map is bounded two ways: idle buckets are swept every
//! `sweep_interval` admissions, and a hard cap on tracked clients evicts
//! an arbitrary bucket once cleanup alone cannot make room.

use crate::client_key::ClientKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-client token-bucket state.
#[derive(Debug, Clone)]
struct Bucket {
    /// Remaining admission tokens, fractional during refill.
    tokens: f64,
    /// Unix seconds of the last refill step.
    last_refill: f64,
}

/// Token-bucket rate limiter keyed by [`ClientKey`].
pub struct RateLimiter {
    buckets: DashMap<ClientKey, Bucket>,
    /// Sustained refill rate in tokens per second.
    rate: f64,
    /// Burst capacity (maximum tokens).
    burst: f64,
    /// Hard cap on distinct tracked clients.
    max_clients: usize,
    /// Buckets idle longer than this are swept.
    idle_timeout_secs: f64,
    /// Sweep runs every this many admission checks.
    sweep_interval: u64,
    admissions: AtomicU64,
}

impl RateLimiter {
    pub fn new(
        rate: f64,
        burst: u32,
        max_clients: usize,
        idle_timeout_secs: u64,
        sweep_interval: u64,
    ) -> Self {
        Self {
            buckets: DashMap::new(),
            rate,
            burst: f64::from(burst),
            max_clients,
            idle_timeout_secs: idle_timeout_secs as f64,
            sweep_interval: sweep_interval.max(1),
            admissions: AtomicU64::new(0),
        }
    }

    /// Admission check against the wall clock.
    pub fn admit(&self, key: &ClientKey) -> bool {
        self.admit_at(key, unix_now_secs())
    }

    /// Admission check at an explicit time, for deterministic tests.
    ///
    /// Rejections leave the bucket's tokens untouched beyond the refill
    /// step already applied.
    pub fn admit_at(&self, key: &ClientKey, now: f64) -> bool {
        self.maybe_sweep(now);

        if !self.buckets.contains_key(key) && self.buckets.len() >= self.max_clients {
            self.sweep(now);
            if self.buckets.len() >= self.max_clients {
                self.evict_one();
            }
        }

        match self.buckets.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let bucket = occupied.get_mut();
                // Clock skew: never let negative elapsed drain the bucket.
                let elapsed = (now - bucket.last_refill).max(0.0);
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                // First sight of a client admits immediately and starts
                // the bucket one token down.
                vacant.insert(Bucket {
                    tokens: self.burst - 1.0,
                    last_refill: now,
                });
                true
            }
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    fn maybe_sweep(&self, now: f64) {
        let count = self.admissions.fetch_add(1, Ordering::Relaxed);
        if count % self.sweep_interval == 0 && count > 0 {
            self.sweep(now);
        }
    }

    /// Drop buckets that have been idle past the timeout.
    fn sweep(&self, now: f64) {
        self.buckets
            .retain(|_, bucket| now - bucket.last_refill <= self.idle_timeout_secs);
    }

    /// Remove an arbitrary bucket to make room under the hard cap.
    fn evict_one(&self) {
        if let Some(entry) = self.buckets.iter().next() {
            let key = entry.key().clone();
            drop(entry);
            self.buckets.remove(&key);
        }
    }
}

pub(crate) fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
