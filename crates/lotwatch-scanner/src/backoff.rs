//! Request pacing and retry backoff.
//!
//! Every worker owns one [`RateController`]. The session asks it how long to wait before each
//! request and reports the result back; the orchestrator asks it for the delay before a retry.
//! Both go through [`RateController::wait_before_next`], which hands out one slot per request so
//! a delay is never served twice.

use lotwatch_core::SearchConfig;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Extra factor applied to the backoff after a rate-limit response.
pub const RATE_LIMIT_FACTOR: u32 = 3;

/// Delay parameters, taken from `[search]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// `d0`, delay before the first retry
    pub base: Duration,
    /// `dMax`, upper bound for any backoff delay
    pub max: Duration,
    /// `m`, growth per consecutive failure
    pub multiplier: f64,
    /// Upper bound of the uniform jitter added to every delay
    pub jitter: Duration,
    /// Pause between requests while nothing is failing
    pub page_delay: Duration,
}

impl BackoffPolicy {
    /// Build from the search configuration.
    #[must_use]
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            jitter: Duration::from_millis(config.jitter_ms),
            page_delay: Duration::from_millis(config.page_delay_ms),
        }
    }

    /// Deterministic backoff for the `k`-th consecutive failure: `min(max, base * m^(k-1))`.
    ///
    /// `k = 0` means nothing has failed and yields zero.
    #[must_use]
    pub fn delay_for_attempt(&self, k: u32) -> Duration {
        if k == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(k - 1).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(scaled).min(self.max)
    }

    /// Backoff after the `k`-th consecutive failure when the last one was a rate limit.
    #[must_use]
    pub fn rate_limited_delay(&self, k: u32) -> Duration {
        self.delay_for_attempt(k)
            .saturating_mul(RATE_LIMIT_FACTOR)
            .min(self.max)
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

/// What a request looked like from the controller's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The page came back with content
    Success,
    /// The site asked us to slow down
    RateLimited,
    /// An anti-automation challenge was served
    Challenge,
    /// Timeout, connection reset, or similar
    TransientError,
}

/// Instruction returned to the caller after an outcome is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerSignal {
    /// Keep going
    Continue,
    /// Stop dispatching new work for a while
    PauseBatch,
}

/// Per-worker pacing and backoff state.
#[derive(Debug)]
pub struct RateController {
    policy: BackoffPolicy,
    consecutive_failures: u32,
    last_rate_limited: bool,
    floor: Duration,
    last_outcome_at: Option<Instant>,
    granted_until: Option<Instant>,
}

impl RateController {
    /// Fresh controller with no history.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            last_rate_limited: false,
            floor: Duration::ZERO,
            last_outcome_at: None,
            granted_until: None,
        }
    }

    /// The policy in use.
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Minimum delay currently enforced after challenges.
    #[must_use]
    pub fn floor(&self) -> Duration {
        self.floor
    }

    /// How long to wait before the next request.
    ///
    /// The first call after an outcome reserves a slot; later calls before the next outcome
    /// return whatever is left of that slot.
    pub fn wait_before_next(&mut self) -> Duration {
        let now = Instant::now();
        if let Some(until) = self.granted_until {
            return until.saturating_duration_since(now);
        }

        let delay = self.next_delay(now);
        self.granted_until = Some(now + delay);
        delay
    }

    fn next_delay(&self, now: Instant) -> Duration {
        if self.consecutive_failures == 0 {
            let Some(last) = self.last_outcome_at else {
                return self.floor;
            };
            let pace = self.policy.page_delay + self.policy.sample_jitter();
            let remaining = pace.saturating_sub(now.saturating_duration_since(last));
            return remaining.max(self.floor);
        }

        let backoff = if self.last_rate_limited {
            self.policy.rate_limited_delay(self.consecutive_failures)
        } else {
            self.policy.delay_for_attempt(self.consecutive_failures)
        };
        backoff.max(self.floor) + self.policy.sample_jitter()
    }

    /// Record the outcome of a request.
    pub fn record_outcome(&mut self, outcome: RequestOutcome) -> ControllerSignal {
        self.last_outcome_at = Some(Instant::now());
        self.granted_until = None;

        match outcome {
            RequestOutcome::Success => {
                self.consecutive_failures = 0;
                self.last_rate_limited = false;
                self.floor /= 2;
                ControllerSignal::Continue
            }
            RequestOutcome::RateLimited => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_rate_limited = true;
                ControllerSignal::Continue
            }
            RequestOutcome::TransientError => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_rate_limited = false;
                ControllerSignal::Continue
            }
            RequestOutcome::Challenge => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_rate_limited = false;
                self.floor = self
                    .floor
                    .saturating_mul(2)
                    .max(self.policy.base)
                    .min(self.policy.max);
                tracing::warn!("Challenge served, backoff floor raised to {:?}", self.floor);
                ControllerSignal::PauseBatch
            }
        }
    }
}
