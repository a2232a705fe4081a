//! Exponential backoff with jitter, shared by the outbox consumer and any
//! other component that needs a retry schedule as a pure function of attempt
//! number (rather than iteratively grown state).
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    pub multiplier: f64,
    /// Fractional jitter applied symmetrically around the computed delay.
    pub jitter_frac: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_frac: 0.10,
        }
    }
}

/// `delay(n) = min(cap, base * multiplier^n) * (1 + U[-jitter_frac, jitter_frac])`
pub fn compute(config: &BackoffConfig, attempt: u32) -> Duration {
    let raw_ms = config.base.as_millis() as f64 * config.multiplier.powi(attempt as i32);
    let capped_ms = raw_ms.min(config.cap.as_millis() as f64);

    let jittered_ms = if config.jitter_frac > 0.0 {
        let mut rng = rand::thread_rng();
        let factor = 1.0 + rng.gen_range(-config.jitter_frac..=config.jitter_frac);
        capped_ms * factor
    } else {
        capped_ms
    };

    Duration::from_millis(jittered_ms.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_cap_even_with_positive_jitter() {
        let config = BackoffConfig {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(500),
            multiplier: 2.0,
            jitter_frac: 0.10,
        };

        for attempt in 0..20 {
            let d = compute(&config, attempt);
            assert!(
                d <= Duration::from_millis(550),
                "attempt {attempt} produced {d:?} which exceeds cap+jitter bound"
            );
        }
    }

    #[test]
    fn grows_exponentially_without_jitter() {
        let config = BackoffConfig {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_frac: 0.0,
        };

        assert_eq!(compute(&config, 0), Duration::from_millis(100));
        assert_eq!(compute(&config, 1), Duration::from_millis(200));
        assert_eq!(compute(&config, 2), Duration::from_millis(400));
    }

    #[test]
    fn stays_within_jitter_bounds() {
        let config = BackoffConfig {
            base: Duration::from_millis(1000),
            cap: Duration::from_secs(30),
            multiplier: 1.0,
            jitter_frac: 0.10,
        };

        for _ in 0..200 {
            let d = compute(&config, 0);
            assert!(d >= Duration::from_millis(900) && d <= Duration::from_millis(1100));
        }
    }
}
