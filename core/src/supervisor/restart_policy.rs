//! Restart budget and backoff calculation
//!
//! [`BackoffPolicy`] turns an attempt number into a delay:
//!
//! ```text
//! raw    = base_delay * multiplier^(attempt-1)
//! capped = min(raw, max_delay)
//! delay  = max(0, capped + capped * jitter_factor * uniform(-1, 1))
//! ```
//!
//! The policy has no memory; the same attempt number always draws from the
//! same distribution. [`RestartState`] carries the per-service crash counter
//! and decides between another attempt and giving up.

use rand::Rng;
use schema::BackoffConfig;
use std::time::Duration;
use tracing::debug;

/// Exponential backoff with symmetric jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base_delay: f64,
    multiplier: f64,
    max_delay: f64,
    jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl BackoffPolicy {
    /// Build a policy from its configuration
    ///
    /// Negative or non-finite inputs are clamped so the delay stays in
    /// `[0, max_delay * (1 + jitter_factor)]`.
    pub fn from_config(config: &BackoffConfig) -> Self {
        let sanitize = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        let max_delay = sanitize(config.max_delay_secs);
        Self {
            base_delay: sanitize(config.base_delay_secs),
            multiplier: if config.multiplier.is_finite() && config.multiplier > 0.0 {
                config.multiplier
            } else {
                1.0
            },
            max_delay,
            jitter_factor: sanitize(config.jitter_factor).min(1.0),
        }
    }

    /// Largest delay the policy can produce
    pub fn upper_bound(&self) -> Duration {
        Duration::from_secs_f64(self.max_delay * (1.0 + self.jitter_factor))
    }

    /// The delay before jitter for `attempt` (1-based; 0 is treated as 1)
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.capped_secs(attempt))
    }

    fn capped_secs(&self, attempt: u32) -> f64 {
        let exponent = attempt.max(1).saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay * self.multiplier.powi(exponent);
        if !raw.is_finite() || raw > self.max_delay {
            self.max_delay
        } else {
            raw.max(0.0)
        }
    }

    /// Delay for `attempt` using the thread-local random generator
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::rng())
    }

    /// Delay for `attempt` drawing jitter from `rng`
    ///
    /// Passing a seeded generator makes the result reproducible.
    pub fn delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.capped_secs(attempt);
        let jitter = if self.jitter_factor > 0.0 {
            capped * self.jitter_factor * rng.random_range(-1.0_f64..=1.0)
        } else {
            0.0
        };
        let secs = (capped + jitter).max(0.0);

        debug!(
            "Backoff attempt {} -> {:.3}s (capped={:.3}s, base={}s, multiplier={}, max={}s, jitter={})",
            attempt, secs, capped, self.base_delay, self.multiplier, self.max_delay, self.jitter_factor
        );
        Duration::from_secs_f64(secs)
    }
}

/// Action to take when a supervised process exits unsolicited
#[derive(Debug, Clone, PartialEq)]
pub enum RestartAction {
    /// Restart after the given delay; `attempt` is the new restart count
    Restart {
        /// Restart attempt number (1-based)
        attempt: u32,
        /// Backoff delay before the next start
        delay: Duration,
    },
    /// The restart budget is spent
    GiveUp {
        /// Number of crashes recorded
        attempts: u32,
    },
}

/// Per-service restart counter bound by a budget
///
/// The counter only grows for the lifetime of a supervision loop; a fresh
/// registration starts a fresh `RestartState`.
#[derive(Debug, Clone)]
pub struct RestartState {
    restart_count: u32,
    max_restarts: u32,
    policy: BackoffPolicy,
}

impl RestartState {
    /// Create a counter starting at zero
    pub fn new(max_restarts: u32, policy: BackoffPolicy) -> Self {
        Self {
            restart_count: 0,
            max_restarts,
            policy,
        }
    }

    /// Number of crashes recorded so far
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Configured budget
    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    /// Record a crash and decide what happens next
    pub fn record_crash(&mut self) -> RestartAction {
        self.record_crash_with(&mut rand::rng())
    }

    /// Record a crash, drawing backoff jitter from `rng`
    pub fn record_crash_with<R: Rng>(&mut self, rng: &mut R) -> RestartAction {
        self.restart_count = self.restart_count.saturating_add(1);
        if self.restart_count >= self.max_restarts {
            return RestartAction::GiveUp {
                attempts: self.restart_count,
            };
        }
        RestartAction::Restart {
            attempt: self.restart_count,
            delay: self.policy.delay_with(self.restart_count, rng),
        }
    }
}
