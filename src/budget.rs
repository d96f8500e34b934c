//! Per-client hourly request budget.
//!
//! A hard cap on total attempts per client per hour bucket. Unlike the
//! rate limiter, the counter advances on rejected calls too: a client
//! hammering past the ceiling keeps failing until the hour rolls over,
//! which is the intended backpressure signal.

use crate::client_key::ClientKey;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counter for one client's current hour bucket.
///
/// The cell resets in place when the hour rolls over, so dead hours are
/// never retained per key.
#[derive(Debug, Clone)]
struct HourCell {
    hour: u64,
    count: u32,
}

/// Hourly attempt ceiling keyed by [`ClientKey`].
pub struct BudgetTracker {
    counters: DashMap<ClientKey, HourCell>,
    /// Admitted iff the post-increment count stays at or under this.
    ceiling: u32,
    max_clients: usize,
    sweep_interval: u64,
    calls: AtomicU64,
}

impl BudgetTracker {
    pub fn new(ceiling: u32, max_clients: usize, sweep_interval: u64) -> Self {
        Self {
            counters: DashMap::new(),
            ceiling,
            max_clients,
            sweep_interval: sweep_interval.max(1),
            calls: AtomicU64::new(0),
        }
    }

    /// Count an attempt against the wall clock's hour bucket.
    pub fn consume(&self, key: &ClientKey) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.consume_at(key, now)
    }

    /// Count an attempt at an explicit time, for deterministic tests.
    ///
    /// The increment happens whether or not the call is admitted.
    pub fn consume_at(&self, key: &ClientKey, now_secs: u64) -> bool {
        let hour = now_secs / 3600;
        self.maybe_sweep(hour);

        if !self.counters.contains_key(key) && self.counters.len() >= self.max_clients {
            self.sweep(hour);
            if self.counters.len() >= self.max_clients {
                self.evict_one();
            }
        }

        let mut cell = self
            .counters
            .entry(key.clone())
            .or_insert(HourCell { hour, count: 0 });
        if cell.hour != hour {
            cell.hour = hour;
            cell.count = 0;
        }
        cell.count = cell.count.saturating_add(1);
        cell.count <= self.ceiling
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.counters.len()
    }

    fn maybe_sweep(&self, current_hour: u64) {
        let count = self.calls.fetch_add(1, Ordering::Relaxed);
        if count % self.sweep_interval == 0 && count > 0 {
            self.sweep(current_hour);
        }
    }

    /// Drop cells left over from past hours.
    fn sweep(&self, current_hour: u64) {
        self.counters.retain(|_, cell| cell.hour >= current_hour);
    }

    fn evict_one(&self) {
        if let Some(entry) = self.counters.iter().next() {
            let key = entry.key().clone();
            drop(entry);
            self.counters.remove(&key);
        }
    }
}
