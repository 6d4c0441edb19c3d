//! Exponential backoff with uniform jitter.
//!
//! Two presets: registration retries grow by powers of two with a wide
//! jitter band; reconnection retries grow by 1.5× with a narrower band and
//! a hard ceiling, so a fleet of agents losing the same directory does not
//! redial in lockstep.

use std::time::Duration;

use rand::Rng;

/// A backoff schedule: `base · factor^(attempt-1) · jitter`, optionally
/// capped before jitter is applied.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_secs: f64,
    pub factor: f64,
    /// Uniform jitter band applied to the grown delay.
    pub jitter: (f64, f64),
    /// Ceiling applied to the grown delay, before jitter.
    pub cap_secs: Option<f64>,
}

impl BackoffPolicy {
    /// Registration preset: doubling growth, jitter in [0.5, 1.5), no cap.
    pub fn registration(base_secs: f64) -> Self {
        Self { base_secs, factor: 2.0, jitter: (0.5, 1.5), cap_secs: None }
    }

    /// Reconnection preset: 1.5× growth, jitter in [0.75, 1.25), capped.
    pub fn reconnection(base_secs: f64, cap_secs: f64) -> Self {
        Self { base_secs, factor: 1.5, jitter: (0.75, 1.25), cap_secs: Some(cap_secs) }
    }

    /// Delay before the given attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let grown = self.base_secs * self.factor.powi(attempt.saturating_sub(1) as i32);
        let capped = match self.cap_secs {
            Some(cap) => grown.min(cap),
            None => grown,
        };
        let jitter = rand::rng().random_range(self.jitter.0..self.jitter.1);
        Duration::from_secs_f64(capped * jitter)
    }
}
