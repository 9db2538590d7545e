//! Request pacing and backoff policy.
//!
//! The [`Governor`] owns every timing decision made around outbound API
//! calls: the minimum inter-request interval, randomized humanization
//! delays, post-response jitter, exponential backoff, and the retry
//! decision itself. It knows nothing about payloads; the transport layer
//! in [`crate::api`] consults it around every attempt.
//!
//! One `Governor` instance is shared by all call sites (dependency
//! injection, not a global). Its only mutable state is the last-request
//! timestamp, guarded by a mutex scoped to the check-and-update, so
//! callers serialize on the timestamp check, not on the full pacing
//! sleep.

use crate::config::PacingConfig;
use parking_lot::Mutex;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Envelope codes the remote uses to signal throttling (risk control).
/// These warrant a longer cool-down than generic failures.
pub const RISK_CONTROL_CODES: [i64; 2] = [-352, 412];

/// Envelope/status codes considered known-transient and worth retrying.
pub const RETRYABLE_CODES: [i64; 6] = [-352, 412, 500, 502, 503, 504];

/// Upper bound of the extra jitter added when the minimum interval has
/// not yet elapsed.
const INTERVAL_JITTER: Duration = Duration::from_millis(300);

/// Upper bound of the post-response jitter.
const POST_REQUEST_JITTER: Duration = Duration::from_millis(500);

/// Multiplicative jitter applied to exponential backoff (30%).
const BACKOFF_JITTER_FACTOR: f64 = 0.3;

/// Extra cool-down multiplier for risk-control rejections.
const RISK_CONTROL_MULTIPLIER: f64 = 1.5;

/// Pacing and backoff state shared across all outbound calls.
#[derive(Debug)]
pub struct Governor {
    min_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    base_backoff: Duration,
    enabled: bool,
    last_request: Mutex<Option<Instant>>,
}

impl Governor {
    /// Build a governor from the pacing configuration.
    #[must_use]
    pub const fn new(config: &PacingConfig) -> Self {
        Self {
            min_delay: config.min_delay(),
            max_delay: config.max_delay(),
            max_retries: config.max_retries,
            base_backoff: config.base_backoff(),
            enabled: config.enabled,
            last_request: Mutex::new(None),
        }
    }

    /// A governor that never waits and never retries. Used when pacing is
    /// disabled and in tests.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries: 0,
            base_backoff: Duration::ZERO,
            enabled: false,
            last_request: Mutex::new(None),
        }
    }

    /// Whether pacing is active. When false, all waits are no-ops.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The configured retry budget.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Timestamp of the most recently completed pre-request wait.
    #[must_use]
    pub fn last_request_at(&self) -> Option<Instant> {
        *self.last_request.lock()
    }

    /// Block until it is safe to issue the next request.
    ///
    /// Enforces the minimum inter-request interval (plus up to 300ms of
    /// jitter when the interval has not elapsed), then sleeps an
    /// additional humanization delay drawn uniformly from
    /// `[min_delay, max_delay]`. The last-request timestamp is recorded
    /// only after both waits complete.
    pub async fn wait_before_request(&self) {
        if !self.enabled {
            return;
        }

        // Check-and-compute under the lock; sleep outside it so concurrent
        // callers block on the check, not on each other's waits.
        let interval_wait = {
            let last = self.last_request.lock();
            last.map_or(Duration::ZERO, |t| {
                let elapsed = t.elapsed();
                if elapsed < self.min_delay {
                    self.min_delay - elapsed + jitter(INTERVAL_JITTER)
                } else {
                    Duration::ZERO
                }
            })
        };

        if !interval_wait.is_zero() {
            sleep(interval_wait).await;
        }

        sleep(self.humanization_delay()).await;

        *self.last_request.lock() = Some(Instant::now());
    }

    /// Post-response jitter: up to 500ms, independent of the pre-request
    /// interval. Runs whether the request succeeded or failed.
    pub async fn wait_after_request(&self) {
        if !self.enabled {
            return;
        }
        sleep(jitter(POST_REQUEST_JITTER)).await;
    }

    /// Exponential backoff with 30% multiplicative jitter:
    /// `base * 2^attempt + U(0, 0.3 * that)`.
    ///
    /// Unbounded in `attempt`; callers cap the attempt count externally.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let backoff = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        backoff + jitter(backoff.mul_f64(BACKOFF_JITTER_FACTOR))
    }

    /// Decide whether a failed attempt should be retried.
    ///
    /// `attempt` is the number of retries already performed. False once
    /// the retry budget is spent; true for the known-transient code set;
    /// true for any other present code (permissive compatibility default;
    /// see [`Self::is_recognized_retryable`] for the distinction callers
    /// may want to log); false when no code is available.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error_code: Option<i64>) -> bool {
        if attempt >= self.max_retries {
            return false;
        }

        match error_code {
            Some(code) if RETRYABLE_CODES.contains(&code) => true,
            // Permissive default: the original behavior retries every
            // present code, not just the known-transient set.
            Some(_) => true,
            None => false,
        }
    }

    /// Whether a code belongs to the explicit known-transient set.
    #[must_use]
    pub fn is_recognized_retryable(error_code: i64) -> bool {
        RETRYABLE_CODES.contains(&error_code)
    }

    /// Delay before the given retry. Risk-control rejections get a 1.5x
    /// longer cool-down than generic failures.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32, error_code: Option<i64>) -> Duration {
        let backoff = self.backoff_delay(attempt);
        match error_code {
            Some(code) if RISK_CONTROL_CODES.contains(&code) => {
                backoff.mul_f64(RISK_CONTROL_MULTIPLIER)
            }
            _ => backoff,
        }
    }

    /// Humanization delay drawn uniformly from `[min_delay, max_delay]`.
    fn humanization_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        self.min_delay + jitter(self.max_delay - self.min_delay)
    }
}

/// Uniform random duration in `[0, max]`.
fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    max.mul_f64(rand::rng().random_range(0.0..=1.0))
}
