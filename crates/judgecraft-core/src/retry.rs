//! Exponential backoff for rate-limited agent calls.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first call; total calls are at most `max_retries + 1`.
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Each sleep adds up to `delay * jitter_factor` on top of the base delay.
    #[serde(deserialize_with = "de_jitter_factor")]
    pub jitter_factor: f64,
}

fn de_jitter_factor<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let factor = f64::deserialize(deserializer)?;
    if !factor.is_finite() || !(0.0..=1.0).contains(&factor) {
        return Err(serde::de::Error::custom(format!(
            "jitter_factor must be between 0 and 1, got {factor}"
        )));
    }
    Ok(factor)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = if jitter_factor.is_finite() {
            jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            max_retries: self.max_retries,
            jitter_factor: self.jitter_factor,
            attempt: 0,
            delay: self.initial_delay,
        }
    }
}

/// Retry state for one case.
#[derive(Debug, Clone)]
pub struct Backoff {
    max_retries: u32,
    jitter_factor: f64,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    /// Retries consumed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Base delay of the next retry, before jitter.
    pub fn base_delay(&self) -> Duration {
        self.delay
    }

    /// Sleep before the next retry, or `None` once the budget is spent.
    ///
    /// Advances the state: the base delay doubles and the attempt counter grows.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let base = self.delay;
        let sleep = base.saturating_add(jitter(base, self.jitter_factor));
        self.delay = base.saturating_mul(2);
        self.attempt += 1;
        Some(sleep)
    }
}

fn jitter(base: Duration, factor: f64) -> Duration {
    let max = base.as_secs_f64() * factor;
    if max <= 0.0 || !max.is_finite() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(rand::thread_rng().gen_range(0.0..=max)).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_max_retries() {
        let mut backoff = RetryPolicy::default().with_max_retries(2).backoff();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempt(), 2);
    }

    #[test]
    fn base_delay_doubles() {
        let mut backoff = RetryPolicy::default()
            .with_max_retries(4)
            .with_initial_delay(Duration::from_millis(250))
            .backoff();
        let mut bases = Vec::new();
        while backoff.attempt() < 4 {
            bases.push(backoff.base_delay());
            backoff.next_delay();
        }
        assert_eq!(
            bases,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
            ]
        );
    }

    #[test]
    fn jitter_stays_within_factor() {
        let policy = RetryPolicy::default().with_max_retries(50);
        let mut backoff = policy.backoff();
        let mut base = policy.initial_delay;
        while let Some(sleep) = backoff.next_delay() {
            assert!(sleep >= base);
            assert!(sleep <= base.mul_f64(1.1) + Duration::from_micros(1));
            base = base.saturating_mul(2);
            if base > Duration::from_secs(3600) {
                break;
            }
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let mut backoff = RetryPolicy::default().with_jitter_factor(0.0).backoff();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn no_retry_policy() {
        assert_eq!(RetryPolicy::no_retry().backoff().next_delay(), None);
    }

    #[test]
    fn deserializes_humantime_delay() {
        let policy: RetryPolicy =
            serde_yaml::from_str("max_retries: 5\ninitial_delay: 500ms\n").unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.jitter_factor, 0.1);
    }

    #[test]
    fn long_retry_budget_saturates() {
        let mut backoff = RetryPolicy::default().with_max_retries(80).backoff();
        let mut last = Duration::ZERO;
        while let Some(sleep) = backoff.next_delay() {
            last = sleep;
        }
        assert_eq!(backoff.attempt(), 80);
        assert_eq!(last, Duration::MAX);
    }

    #[test]
    fn huge_jitter_never_panics() {
        let mut backoff = RetryPolicy {
            jitter_factor: 1e20,
            ..Default::default()
        }
        .backoff();
        let sleep = backoff.next_delay().unwrap();
        assert!(sleep >= Duration::from_secs(1));
    }

    #[test]
    fn jitter_factor_is_clamped() {
        assert_eq!(RetryPolicy::default().with_jitter_factor(1e20).jitter_factor, 1.0);
        assert_eq!(RetryPolicy::default().with_jitter_factor(-1.0).jitter_factor, 0.0);
        assert_eq!(RetryPolicy::default().with_jitter_factor(f64::NAN).jitter_factor, 0.0);
    }

    #[test]
    fn rejects_out_of_range_jitter_in_yaml() {
        for yaml in ["jitter_factor: 1e20\n", "jitter_factor: -0.5\n", "jitter_factor: .nan\n"] {
            let err = serde_yaml::from_str::<RetryPolicy>(yaml).unwrap_err();
            assert!(err.to_string().contains("jitter_factor"), "{err}");
        }
        let policy: RetryPolicy = serde_yaml::from_str("jitter_factor: 0.25\n").unwrap();
        assert_eq!(policy.jitter_factor, 0.25);
    }
}
