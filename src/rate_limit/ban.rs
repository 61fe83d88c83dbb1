use std::time::{Duration, Instant};

use super::window::WindowRecord;

// Deadlines further out are clamped so they always fit in an Instant
pub const MAX_BAN: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

// Bans ride on the window record; they never read or reset the counters.
impl WindowRecord {
    pub fn is_banned_at(&self, now: Instant) -> bool {
        self.banned_until.is_some_and(|until| now < until)
    }

    pub fn ban_at(&mut self, now: Instant, duration: Duration) {
        if let Some(until) = now.checked_add(duration.min(MAX_BAN)) {
            self.banned_until = Some(until);
        }
    }

    // Expiry is only observed lazily, when the record is next counted
    pub fn clear_expired_ban(&mut self, now: Instant) {
        if self.banned_until.is_some_and(|until| now >= until) {
            self.banned_until = None;
        }
    }

    // Sweep eligibility: banned records go one window after `window_start`,
    // unbanned ones after two. An active ban is always kept.
    pub fn is_stale(&self, now: Instant, window: Duration) -> bool {
        if self.is_banned_at(now) {
            return false;
        }
        let elapsed = now.saturating_duration_since(self.window_start);
        match self.banned_until {
            Some(_) => elapsed >= window,
            None => elapsed >= window.saturating_mul(2),
        }
    }
}
