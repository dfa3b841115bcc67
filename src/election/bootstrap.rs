//! Session Bootstrap
//!
//! A process that crashes and restarts faster than the coordination
//! service's session timeout can be mistaken for its own previous session.
//! Opening and closing a throwaway session first makes the service see an
//! explicit session end before the session we keep is established.

use std::time::Duration;

use rand::Rng;

use super::{Connector, Session};
use crate::error::{Error, Result};

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base sleep between attempts
    pub base_sleep: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Upper bound for a single sleep
    pub max_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_sleep: Duration::from_secs(1),
            max_retries: 3,
            max_sleep: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default maximum sleep
    pub fn new(base_sleep: Duration, max_retries: u32) -> Self {
        Self {
            base_sleep,
            max_retries,
            ..Self::default()
        }
    }

    /// Cap every individual sleep at `max_sleep`
    pub fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    /// Sleep before retry number `retry` (0-based): the base sleep times a
    /// random factor in `[1, 2^(retry + 1))`.
    pub fn sleep_for(&self, retry: u32) -> Duration {
        // 2^30 still fits the u32 multiplier below
        let upper = 1u32 << (retry.min(29) + 1);
        let factor = rand::thread_rng().gen_range(1..upper);
        self.base_sleep.saturating_mul(factor).min(self.max_sleep)
    }

    /// Run `op`, retrying retryable failures until the retries are used up
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.max_retries => {
                    let sleep = self.sleep_for(retry);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        retry + 1,
                        self.max_retries + 1,
                        e,
                        sleep
                    );
                    std::thread::sleep(sleep);
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Open a session and start it under the retry policy
fn open_started<C: Connector>(connector: &C, retry: &RetryPolicy) -> Result<C::Session> {
    let session = connector.open()?;

    if let Err(e) = retry.run("Session start", || session.start()) {
        if let Err(close_err) = session.close() {
            tracing::debug!("Failed to close unstarted session: {}", close_err);
        }
        return Err(e);
    }

    Ok(session)
}

/// Connect twice and keep only the second session.
///
/// The first session is started and closed straight away so that a stale
/// session left by a previous incarnation of this process is never confused
/// with the one returned here.
pub fn connect_fresh<C: Connector>(connector: &C, retry: &RetryPolicy) -> Result<C::Session> {
    let throwaway = open_started(connector, retry)?;

    tracing::debug!("Closing bootstrap session before reconnecting");
    match throwaway.close() {
        Ok(()) | Err(Error::AlreadyClosed) => {}
        Err(e) => return Err(e),
    }

    let session = open_started(connector, retry)?;
    tracing::info!("Connected to coordination service");

    Ok(session)
}
