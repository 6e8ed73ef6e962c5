use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// What a subscription does after consecutive failed polls.
///
/// `None` keeps the fixed poll cadence no matter how long the failure streak
/// gets. `Exponential` waits an extra `min(base * 2^(n-1), max)` plus up to
/// `jitter` after the n-th consecutive failure; one success resets the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    #[default]
    None,
    Exponential { base_ms: u64, max_ms: u64, jitter_ms: u64 },
}

impl BackoffPolicy {
    pub fn exponential(base: Duration, max: Duration, jitter: Duration) -> Self {
        BackoffPolicy::Exponential {
            base_ms: base.as_millis() as u64,
            max_ms: max.as_millis() as u64,
            jitter_ms: jitter.as_millis() as u64,
        }
    }

    pub fn extra_delay(&self, failures: u32) -> Duration {
        self.extra_delay_with(failures, &mut rand::thread_rng())
    }

    pub fn extra_delay_with<R: Rng>(&self, failures: u32, rng: &mut R) -> Duration {
        match *self {
            BackoffPolicy::None => Duration::ZERO,
            _ if failures == 0 => Duration::ZERO,
            BackoffPolicy::Exponential { base_ms, max_ms, jitter_ms } => {
                let factor = 1u64.checked_shl(failures - 1).unwrap_or(u64::MAX);
                let backoff = base_ms.saturating_mul(factor).min(max_ms);
                let jitter = if jitter_ms == 0 { 0 } else { rng.gen_range(0..=jitter_ms) };
                Duration::from_millis(backoff.saturating_add(jitter))
            }
        }
    }
}
