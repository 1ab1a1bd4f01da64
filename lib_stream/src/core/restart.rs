//! Delay between supervisor cycles.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capped exponential backoff with optional full jitter.
///
/// `attempt` counts consecutive failed cycles and starts at 1. The delay for
/// attempt `n` is `min(base * 2^(n-1), max)`, and with jitter a uniform draw
/// from `[0, that]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Draw each delay uniformly from `[0, ceiling]`.
    pub jitter: bool,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RestartPolicy {
    /// Restart right away, every time.
    pub fn immediate() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            jitter: false,
        }
    }

    /// True when no delay is ever applied.
    pub fn is_immediate(&self) -> bool {
        self.max.is_zero() || self.base.is_zero()
    }

    /// Upper bound of the delay for `attempt`, before jitter.
    pub fn ceiling_for(&self, attempt: u32) -> Duration {
        if self.is_immediate() {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(20);
        let base_ms = self.base.as_millis().min(u64::MAX as u128) as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(exp_ms).min(self.max)
    }

    /// Delay to wait before attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let ceiling_ms = ceiling.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rand::rng().random_range(0..=ceiling_ms))
    }
}
