mod ban;
mod window;

pub use window::WindowRecord;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::metrics::{BANS_TOTAL, LIMITER_RECORDS};

// How often the opportunistic sweep may run, independent of the window
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

// Immutable limits for one limiter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    pub window: Duration,
    pub max_occurrences: u32,
}

impl LimiterConfig {
    pub fn new(window: Duration, max_occurrences: u32) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            max_occurrences,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Counted,
    Banned, // newly or already
}

// Per-key window records; owns every record it creates
pub struct RateLimiter {
    name: &'static str,
    config: LimiterConfig,
    records: DashMap<String, WindowRecord>,
    cleanup_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(name: &'static str, config: LimiterConfig) -> Self {
        Self::starting_at(name, config, Instant::now())
    }

    fn starting_at(name: &'static str, config: LimiterConfig, now: Instant) -> Self {
        Self {
            name,
            config,
            records: DashMap::new(),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            last_sweep: Mutex::new(now),
        }
    }

    pub fn with_cleanup_interval(mut self, cleanup_interval: Duration) -> Self {
        self.cleanup_interval = cleanup_interval;
        self
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn check_and_increment(&self, key: &str) -> bool {
        self.check_and_increment_at(key, Instant::now())
    }

    pub fn check_and_increment_at(&self, key: &str, now: Instant) -> bool {
        // before the entry guard: retain locks every shard
        self.maybe_sweep(now);

        match self.records.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(WindowRecord::first_occurrence(now));
                true
            }
            Entry::Occupied(mut slot) => self.admit(slot.get_mut(), now),
        }
    }

    fn admit(&self, record: &mut WindowRecord, now: Instant) -> bool {
        if record.is_banned_at(now) {
            return false;
        }
        record.clear_expired_ban(now);
        record.try_admit(now, self.config.window, self.config.max_occurrences)
    }

    pub fn get_record(&self, key: &str) -> Option<WindowRecord> {
        self.records.get(key).map(|record| record.clone())
    }

    #[allow(dead_code)]
    pub fn ban(&self, key: &str, duration: Duration) {
        self.ban_at(key, duration, Instant::now());
    }

    #[allow(dead_code)]
    pub fn ban_at(&self, key: &str, duration: Duration, now: Instant) {
        self.records
            .entry(key.to_string())
            .or_insert_with(|| WindowRecord::new(now))
            .ban_at(now, duration);
    }

    pub fn is_banned(&self, key: &str) -> bool {
        self.is_banned_at(key, Instant::now())
    }

    pub fn is_banned_at(&self, key: &str, now: Instant) -> bool {
        self.records
            .get(key)
            .is_some_and(|record| record.is_banned_at(now))
    }

    pub fn clear(&self, key: &str) {
        self.records.remove(key);
    }

    // Deny and ban under one entry guard: a key is banned and logged once
    pub fn record_failure(&self, key: &str, ban_duration: Duration) -> FailureOutcome {
        self.record_failure_at(key, ban_duration, Instant::now())
    }

    pub fn record_failure_at(
        &self,
        key: &str,
        ban_duration: Duration,
        now: Instant,
    ) -> FailureOutcome {
        self.maybe_sweep(now);

        let newly_banned = match self.records.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(WindowRecord::first_occurrence(now));
                return FailureOutcome::Counted;
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                let already_banned = record.is_banned_at(now);
                if self.admit(record, now) {
                    return FailureOutcome::Counted;
                }
                if !already_banned {
                    record.ban_at(now, ban_duration);
                }
                !already_banned
            }
        };

        if newly_banned {
            BANS_TOTAL.inc();
            warn!(
                limiter = self.name,
                client = key,
                ban_secs = ban_duration.as_secs(),
                "client banned after repeated failures"
            );
        }
        FailureOutcome::Banned
    }

    // Deletes every stale record now; returns how many went
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.len();
        let window = self.config.window;
        self.records.retain(|_, record| !record.is_stale(now, window));

        let remaining = self.len();
        LIMITER_RECORDS
            .with_label_values(&[self.name])
            .set(remaining as f64);
        debug!(
            limiter = self.name,
            removed = before.saturating_sub(remaining),
            remaining,
            "limiter sweep complete"
        );
        before.saturating_sub(remaining)
    }

    // At most once per cleanup interval; skipped while another caller sweeps
    fn maybe_sweep(&self, now: Instant) {
        let Ok(mut last_sweep) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last_sweep) < self.cleanup_interval {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);
        self.sweep_at(now);
    }
}
