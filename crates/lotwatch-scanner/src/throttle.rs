//! Adaptive concurrency for a batch.
//!
//! Rate-limit and challenge responses from enough distinct keywords inside the window halve the
//! number of workers allowed to take new keywords. A challenge also pauses dispatch for the
//! whole batch. A run of successes lets the limit grow back one step at a time.

use lotwatch_core::{KeywordId, SearchConfig};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Site pushback seen by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleSignal {
    RateLimited,
    Challenge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
    /// Upper bound, the batch's concurrency limit
    pub configured_limit: usize,
    pub window: Duration,
    /// Distinct keywords within `window` that trigger a reduction
    pub threshold: usize,
    pub challenge_pause: Duration,
    /// Consecutive successes before the limit grows by one
    pub recovery_successes: u32,
}

impl ThrottleSettings {
    #[must_use]
    pub fn from_config(config: &SearchConfig, configured_limit: usize) -> Self {
        Self {
            configured_limit: configured_limit.max(1),
            window: config.throttle_window(),
            threshold: config.throttle_threshold.max(1),
            challenge_pause: config.challenge_pause(),
            recovery_successes: config.recovery_successes.max(1),
        }
    }
}

#[derive(Debug)]
struct ThrottleState {
    effective: usize,
    events: VecDeque<(Instant, KeywordId)>,
    paused_until: Option<Instant>,
    success_streak: u32,
}

/// Shared by all workers of a batch.
#[derive(Debug)]
pub struct AdaptiveThrottle {
    settings: ThrottleSettings,
    state: Mutex<ThrottleState>,
    changed: Notify,
}

impl AdaptiveThrottle {
    #[must_use]
    pub fn new(settings: ThrottleSettings) -> Self {
        Self {
            state: Mutex::new(ThrottleState {
                effective: settings.configured_limit,
                events: VecDeque::new(),
                paused_until: None,
                success_streak: 0,
            }),
            settings,
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Workers currently allowed to take new keywords.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.lock().effective
    }

    /// Whether worker `index` (0-based) may take a new keyword.
    #[must_use]
    pub fn admits(&self, index: usize) -> bool {
        index < self.effective_limit()
    }

    /// Time left in a challenge pause, if one is active.
    #[must_use]
    pub fn pause_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .paused_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Sleep until no challenge pause is active. A pause extended meanwhile is waited out too.
    pub async fn wait_out_pause(&self) {
        while let Some(remaining) = self.pause_remaining() {
            tracing::debug!("Holding for {:?} of challenge pause", remaining);
            tokio::time::sleep(remaining).await;
        }
    }

    /// Record pushback for `keyword`. Returns the effective limit afterwards.
    pub fn record_signal(&self, keyword: KeywordId, signal: ThrottleSignal) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        state.success_streak = 0;

        if signal == ThrottleSignal::Challenge {
            let until = now + self.settings.challenge_pause;
            state.paused_until = Some(state.paused_until.map_or(until, |p| p.max(until)));
            tracing::warn!(
                "Challenge on keyword {}, pausing dispatch for {:?}",
                keyword,
                self.settings.challenge_pause
            );
        }

        state.events.push_back((now, keyword));
        let window = self.settings.window;
        while state
            .events
            .front()
            .is_some_and(|(at, _)| now.saturating_duration_since(*at) > window)
        {
            state.events.pop_front();
        }

        let mut distinct: Vec<KeywordId> = state.events.iter().map(|(_, k)| *k).collect();
        distinct.sort_unstable();
        distinct.dedup();

        if distinct.len() >= self.settings.threshold && state.effective > 1 {
            let reduced = (state.effective / 2).max(1);
            tracing::warn!(
                "Pushback from {} keywords within {:?}, concurrency {} -> {}",
                distinct.len(),
                window,
                state.effective,
                reduced
            );
            state.effective = reduced;
            state.events.clear();
        }

        state.effective
    }

    /// Record a keyword success. Returns the effective limit afterwards.
    pub fn record_success(&self) -> usize {
        let mut state = self.lock();
        state.success_streak += 1;

        let grown = if state.success_streak >= self.settings.recovery_successes
            && state.effective < self.settings.configured_limit
        {
            state.effective += 1;
            state.success_streak = 0;
            tracing::info!("Concurrency recovered to {}", state.effective);
            true
        } else {
            false
        };
        let effective = state.effective;
        drop(state);

        if grown {
            self.changed.notify_waiters();
        }
        effective
    }

    /// Resolves the next time the limit grows.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}
