//! Node configuration

use std::time::Duration;

use rand::Rng;

use crate::core::Threshold;

/// Configuration for exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial backoff duration
    pub initial: Duration,
    /// Maximum backoff duration
    pub max: Duration,
    /// Multiplier for each retry (typically 2.0)
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Backoff before the `retries`-th retry, jittered to 50%..150%.
    #[must_use]
    pub fn duration(&self, retries: u32, rng: &mut impl Rng) -> Duration {
        let exponent = i32::try_from(retries.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max.as_secs_f64());
        let jitter_factor = rng.random_range(0.5..1.5);
        Duration::from_secs_f64(capped * jitter_factor)
    }
}

/// Runtime configuration of a [`Node`](crate::node::Node).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// How long a phase may wait for its quorum before the round is retried
    /// with a fresh ballot.
    pub phase_timeout: Duration,
    /// Delay policy between retries
    pub backoff: BackoffConfig,
    /// Seed for the ballot bootstrap and jitter; `None` seeds from the OS
    pub seed: Option<u64>,
    /// Replies needed per phase
    pub threshold: Threshold,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            phase_timeout: Duration::from_millis(500),
            backoff: BackoffConfig::default(),
            seed: None,
            threshold: Threshold::Majority,
        }
    }
}

impl NodeConfig {
    /// Default configuration with a fixed RNG seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = BackoffConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        for retries in 1..20 {
            let d = config.duration(retries, &mut rng);
            let base = (0.01 * 2f64.powi(i32::try_from(retries - 1).unwrap())).min(1.0);
            assert!(d.as_secs_f64() >= base * 0.5 - 1e-9, "{retries}: {d:?}");
            assert!(d.as_secs_f64() <= base * 1.5 + 1e-9, "{retries}: {d:?}");
        }
    }

    #[test]
    fn test_backoff_huge_retry_count_is_capped() {
        let config = BackoffConfig::default();
        let mut rng = StdRng::seed_from_u64(2);
        assert!(config.duration(u32::MAX, &mut rng) <= Duration::from_millis(1500));
    }
}
