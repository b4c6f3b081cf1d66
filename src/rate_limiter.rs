//! Request pacing with adaptive backoff.
//!
//! MusicBrainz asks anonymous clients for at most one request per second.
//! The limiter hands out time slots; callers sleep until their slot
//! outside of any lock, so a shared limiter never blocks other threads
//! while one of them waits.

use std::time::{Duration, Instant};

/// Enforces a minimum interval between requests, widened after failures.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    next_slot: Option<Instant>,
    current_interval: Duration,
    base_interval: Duration,
    max_interval: Duration,
    streak: u32,
    successes_to_reduce: u32,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// * `name`: label for log messages
    /// * `base_interval`: minimum time between requests
    /// * `max_interval`: upper bound after repeated failures
    /// * `successes_to_reduce`: consecutive successes before halving the
    ///   interval (0 disables adaptive reduction)
    pub fn new(name: &str, base_interval: Duration, max_interval: Duration, successes_to_reduce: u32) -> Self {
        RateLimiter {
            name: name.to_string(),
            next_slot: None,
            current_interval: base_interval,
            base_interval,
            max_interval,
            streak: 0,
            successes_to_reduce,
        }
    }

    /// Max interval = 16× base, reduce after 10 successes.
    pub fn from_millis(name: &str, millis: u64) -> Self {
        let base = Duration::from_millis(millis);
        Self::new(name, base, base.saturating_mul(16), 10)
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Book the next request slot and return how long the caller has to
    /// wait before sending. Must be called once per request.
    pub fn reserve(&mut self) -> Duration {
        self.reserve_at(Instant::now())
    }

    fn reserve_at(&mut self, now: Instant) -> Duration {
        let slot = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_slot = Some(slot + self.current_interval);
        let wait = slot - now;
        if !wait.is_zero() {
            log::debug!("[{}] rate limiting: waiting {:.1}s", self.name, wait.as_secs_f64());
        }
        wait
    }

    /// Feed back the outcome of a request. A failure doubles the spacing
    /// at once (up to the max); every run of `successes_to_reduce`
    /// successes halves it again, never below the base.
    pub fn record(&mut self, succeeded: bool) {
        let previous = self.current_interval;
        if !succeeded {
            self.streak = 0;
            self.current_interval = self.current_interval.saturating_mul(2).min(self.max_interval);
        } else if self.successes_to_reduce > 0 {
            self.streak += 1;
            if self.streak == self.successes_to_reduce {
                self.streak = 0;
                self.current_interval = (self.current_interval / 2).max(self.base_interval);
            }
        }

        if self.current_interval != previous {
            log::debug!(
                "[{}] request spacing {:.1}s -> {:.1}s",
                self.name,
                previous.as_secs_f64(),
                self.current_interval.as_secs_f64()
            );
        }
    }
}
