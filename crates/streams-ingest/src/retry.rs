//! Reconnect policy for the upstream feed.
//!
//! ```text
//! attempt fails ──► ran longer than 2 × delay? ──yes──► attempts = 0
//!                                 │                         │
//!                                 └───────────no────────────┤
//!                                                           ▼
//!                                                   attempts += 1
//!                                                           │
//!                              attempts >= max? ──yes──► GiveUp
//!                                                           │ no
//!                                                           ▼
//!                                                  RetryAfter(delay)
//! ```
//!
//! A session that ran for a while before failing is treated as healthy, so
//! only runs of rapid consecutive failures spend the budget.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{IngestError, IngestResult};
use crate::ingestor::FeedSource;

/// What to do after an attempt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then reconnect.
    RetryAfter(Duration),
    /// The budget of rapid failures is spent.
    GiveUp,
}

/// Attempt counter with a time-based reset.
#[derive(Clone, Debug)]
pub struct RetryState {
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
}

impl RetryState {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    /// Consecutive rapid attempts counted so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether an attempt that ran for `ran_for` clears the counter.
    pub fn resets_after(&self, ran_for: Duration) -> bool {
        ran_for > self.delay.saturating_mul(2)
    }

    /// Account for an attempt that ran for `ran_for` and ended.
    pub fn record_attempt(&mut self, ran_for: Duration) -> RetryDecision {
        if self.resets_after(ran_for) {
            self.attempts = 0;
        }
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.delay)
        }
    }
}

/// Run `source` session after session until cancelled or out of budget.
///
/// Returns `Ok(())` when `cancel` fires and
/// [`IngestError::RetriesExhausted`] when the budget is spent.
pub async fn run_with_retry(
    source: &dyn FeedSource,
    mut state: RetryState,
    cancel: &CancellationToken,
) -> IngestResult<()> {
    loop {
        let started = Instant::now();
        let outcome = source.run(cancel).await;
        let ran_for = started.elapsed();

        if cancel.is_cancelled() {
            info!("ingestion stopped");
            return Ok(());
        }

        let last = match outcome {
            Ok(()) => {
                info!(?ran_for, "upstream session ended");
                "session ended".to_string()
            }
            Err(e) => {
                warn!(?ran_for, error = %e, "fetch events failed");
                e.to_string()
            }
        };

        match state.record_attempt(ran_for) {
            RetryDecision::GiveUp => {
                return Err(IngestError::RetriesExhausted {
                    attempts: state.attempts(),
                    last,
                });
            }
            RetryDecision::RetryAfter(delay) => {
                info!(attempt = state.attempts(), ?delay, "reconnecting upstream after delay");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("ingestion stopped");
                        return Ok(());
                    }
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}
