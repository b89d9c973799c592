//! Exponential backoff with jitter, parameterised per call site (poller:
//! base 1s/cap 60s; executor: base 2s/cap 5min/±20%; reporter: base 1s/cap
//! 30s — spec.md §4.E/§4.F/§4.H).

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base: Duration,
    factor: f64,
    cap: Duration,
    jitter: f64,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, factor: f64, cap: Duration, jitter: f64) -> Self {
        Self { base, factor, cap, jitter }
    }

    /// Delay before the `attempt`-th retry (0-indexed: the delay before the
    /// *first* retry after an initial failure is `delay_for_attempt(0)`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt as i32);
        let raw = self.base.as_secs_f64() * exp;
        let capped = raw.min(self.cap.as_secs_f64());

        let jitter_frac = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * jitter_frac).max(0.0))
    }
}

/// Jitter a fixed interval by `±fraction` (e.g. the poller's ±10% poll
/// interval jitter, to avoid a thundering herd across many agents).
pub fn jittered(interval: Duration, fraction: f64) -> Duration {
    let jitter_frac = 1.0 + rand::thread_rng().gen_range(-fraction..=fraction);
    Duration::from_secs_f64((interval.as_secs_f64() * jitter_frac).max(0.0))
}
