//! Blocking JSON fetcher with bounded retries.
//!
//! All traffic to the catalog goes through [`Fetcher::fetch_json`]. A
//! request is retried on non-2xx responses, transport errors and
//! undecodable bodies, with a linearly growing pause between attempts.
//! Every wait honors the caller's [`FetchContext`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;

use crate::error::FetchError;
use crate::rate_limiter::RateLimiter;

pub const DEFAULT_USER_AGENT: &str = concat!(
    "GenreBender/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/genrebender/genrebender)"
);

/// Longest single sleep before re-checking cancellation.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Response bodies are cut to this many characters in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline and cancellation for one unit of work.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

impl FetchContext {
    /// A context that expires `timeout` from now. A timeout too large to
    /// represent means no deadline.
    pub fn with_timeout(timeout: Duration, cancel: CancelToken) -> Self {
        FetchContext {
            deadline: Instant::now().checked_add(timeout),
            cancel,
        }
    }

    /// [`with_timeout`](Self::with_timeout) with a token nobody else holds.
    pub fn expiring_in(timeout: Duration) -> Self {
        Self::with_timeout(timeout, CancelToken::new())
    }

    /// `Err` once the work should stop.
    pub fn check(&self) -> Result<(), FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(FetchError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Sleep for `duration`, waking early when cancelled or out of time.
    pub fn sleep(&self, duration: Duration) -> Result<(), FetchError> {
        let until = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            let mut slice = (until - now).min(SLEEP_SLICE);
            if let Some(remaining) = self.remaining() {
                slice = slice.min(remaining);
            }
            thread::sleep(slice);
        }
    }
}

/// Retry and timeout parameters for [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    /// Upper bound for one attempt; clipped to the context deadline
    pub request_timeout: Duration,
    pub max_attempts: u32,
    /// Pause after the first failed attempt
    pub backoff_base: Duration,
    /// Added to the pause for each further failed attempt
    pub backoff_step: Duration,
    /// Minimum spacing between requests
    pub rate_limit: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(15),
            max_attempts: 5,
            backoff_base: Duration::from_millis(900),
            backoff_step: Duration::from_millis(300),
            rate_limit: Duration::from_millis(1100),
        }
    }
}

impl FetcherConfig {
    /// Pause after the attempt with zero-based index `attempt` failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base + self.backoff_step * attempt
    }
}

/// HTTP GET + JSON decode with bounded retries. Safe to share between threads.
pub struct Fetcher {
    agent: ureq::Agent,
    config: FetcherConfig,
    limiter: Mutex<RateLimiter>,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let agent = ureq::AgentBuilder::new().build();
        let limiter = Mutex::new(RateLimiter::from_millis(
            "MusicBrainz",
            config.rate_limit.as_millis() as u64,
        ));
        Fetcher { agent, config, limiter }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// GET `url` and decode the JSON body into `T`.
    ///
    /// Returns the last failure once `max_attempts` attempts have failed,
    /// or immediately when the context is cancelled or past its deadline.
    pub fn fetch_json<T: DeserializeOwned>(&self, url: &str, ctx: &FetchContext) -> Result<T, FetchError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_err = FetchError::Transport("no attempt made".to_string());

        for attempt in 0..attempts {
            ctx.check()?;
            let wait = self.with_limiter(|rl| rl.reserve());
            ctx.sleep(wait)?;

            match self.attempt::<T>(url, ctx) {
                Ok(value) => {
                    self.with_limiter(|rl| rl.record(true));
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    self.with_limiter(|rl| rl.record(false));
                    log::warn!("GET {} failed (attempt {}/{}): {}", url, attempt + 1, attempts, err);
                    last_err = err;
                }
            }

            if attempt + 1 < attempts {
                ctx.sleep(self.config.backoff(attempt))?;
            }
        }

        Err(last_err)
    }

    fn attempt<T: DeserializeOwned>(&self, url: &str, ctx: &FetchContext) -> Result<T, FetchError> {
        let mut timeout = self.config.request_timeout;
        if let Some(remaining) = ctx.remaining() {
            if remaining.is_zero() {
                return Err(FetchError::DeadlineExceeded);
            }
            timeout = timeout.min(remaining);
        }

        log::debug!("GET {}", url);
        let request = self
            .agent
            .get(url)
            .set("User-Agent", &self.config.user_agent)
            .timeout(timeout);

        // The blocking call runs on its own thread so the context is
        // observed while it is in flight. An abandoned worker ends at its
        // own timeout and drops the connection.
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("genrebender-http".to_string())
            .spawn(move || {
                let _ = tx.send(read_body(request));
            })
            .map_err(|e| FetchError::Transport(format!("cannot start request: {}", e)))?;

        let outcome = loop {
            match rx.recv_timeout(SLEEP_SLICE) {
                Ok(outcome) => break outcome,
                Err(RecvTimeoutError::Timeout) => ctx.check()?,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(FetchError::Transport("request thread exited".to_string()))
                }
            }
        };

        let body = match outcome {
            Err(FetchError::Transport(message)) => {
                // A timeout caused by the deadline is not worth retrying
                ctx.check()?;
                return Err(FetchError::Transport(message));
            }
            other => other?,
        };
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    fn with_limiter<R>(&self, f: impl FnOnce(&mut RateLimiter) -> R) -> R {
        let mut guard = match self.limiter.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

fn read_body(request: ureq::Request) -> Result<String, FetchError> {
    match request.call() {
        Ok(response) => response
            .into_string()
            .map_err(|e| FetchError::Transport(e.to_string())),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(FetchError::Status {
                status,
                body: trim_body(&body),
            })
        }
        Err(ureq::Error::Transport(transport)) => Err(FetchError::Transport(transport.to_string())),
    }
}

fn trim_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
