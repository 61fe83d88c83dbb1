use std::time::{Duration, Instant};

// Per-key record: `prev_count` is the window before `window_start`,
// `curr_count` everything since
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    pub window_start: Instant,
    pub prev_count: u32,
    pub curr_count: u32,
    pub banned_until: Option<Instant>,
}

impl WindowRecord {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            prev_count: 0,
            curr_count: 0,
            banned_until: None,
        }
    }

    // Record for a key seen for the first time; its occurrence is counted.
    pub fn first_occurrence(now: Instant) -> Self {
        Self {
            curr_count: 1,
            ..Self::new(now)
        }
    }

    // One window shifts curr into prev; two or more zero both
    pub fn slide(&mut self, now: Instant, window: Duration) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < window {
            return;
        }

        let windows_to_slide = elapsed.as_nanos() / window.as_nanos();
        if windows_to_slide == 1 {
            self.prev_count = self.curr_count;
        } else {
            self.prev_count = 0;
        }
        self.curr_count = 0;

        // window_start + k * window == now - (elapsed mod window)
        let remainder = elapsed.as_nanos() % window.as_nanos();
        let remainder = Duration::from_nanos(u64::try_from(remainder).unwrap_or(u64::MAX));
        self.window_start = now.checked_sub(remainder).unwrap_or(now);
    }

    // floor(prev * max(0, 1 - elapsed/window) + curr); slide first
    pub fn weighted_count(&self, now: Instant, window: Duration) -> u64 {
        let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
        let prev_weight = (1.0 - elapsed / window.as_secs_f64()).max(0.0);
        let weighted = f64::from(self.prev_count) * prev_weight + f64::from(self.curr_count);
        weighted.floor() as u64
    }

    // Checked against the count before this occurrence
    pub fn try_admit(&mut self, now: Instant, window: Duration, max: u32) -> bool {
        self.slide(now, window);
        if self.weighted_count(now, window) >= u64::from(max) {
            return false;
        }
        self.curr_count = self.curr_count.saturating_add(1);
        true
    }
}
