use std::time::Duration;

use rand::Rng;

pub const DEFAULT_INTERVAL_MILLIS: u64 = 100;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_MAX_BACKOFF_MILLIS: u64 = 60 * 1_000;
pub const RANDOM_FACTOR: f64 = 0.5;

/// Exponential backoff parameters shared by the HTTP transports and the transaction runner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub interval_millis: u64,
    pub backoff_factor: f64,
    pub max_millis: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            interval_millis: DEFAULT_INTERVAL_MILLIS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_millis: DEFAULT_MAX_BACKOFF_MILLIS,
        }
    }
}

impl BackoffConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval_millis: interval.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Delay to wait before retry number `attempt` (zero based), with +/- 50% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_with_rng(
            attempt,
            *self,
            &mut rand::thread_rng(),
        ))
    }
}

fn calculate_backoff_with_rng<R: Rng + ?Sized>(
    backoff_count: u32,
    config: BackoffConfig,
    rng: &mut R,
) -> u64 {
    if config.interval_millis == 0 {
        return 0;
    }
    let base = (config.interval_millis as f64) * config.backoff_factor.powi(backoff_count as i32);
    let jitter = RANDOM_FACTOR * base * rng.gen_range(-1.0..=1.0);
    (base + jitter).round().clamp(0.0, config.max_millis as f64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn stays_within_jitter_window() {
        let mut rng = StdRng::seed_from_u64(42);
        let value = calculate_backoff_with_rng(3, BackoffConfig::default(), &mut rng);
        assert!(value >= 400);
        assert!(value <= 1_200);
    }

    #[test]
    fn clamps_to_maximum() {
        let mut rng = StdRng::seed_from_u64(7);
        let config = BackoffConfig {
            max_millis: 500,
            ..BackoffConfig::default()
        };
        assert_eq!(calculate_backoff_with_rng(20, config, &mut rng), 500);
    }

    #[test]
    fn zero_interval_disables_waiting() {
        let config = BackoffConfig::with_interval(Duration::ZERO);
        assert_eq!(config.delay_for(3), Duration::ZERO);
    }
}
