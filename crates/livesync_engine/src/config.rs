//! Configuration for the sync engine.

use livesync_protocol::ClientInfo;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// Configuration for network operations and subscriptions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Metadata sent in the client-info header.
    pub client_info: ClientInfo,
    /// Retry backoff configuration.
    pub backoff: BackoffConfig,
    /// URI that accepts subscription establish/cancel requests.
    pub subscriptions_uri: String,
}

impl SyncConfig {
    /// Creates a configuration with the given subscriptions URI.
    pub fn new(subscriptions_uri: impl Into<String>) -> Self {
        Self {
            client_info: ClientInfo::default(),
            backoff: BackoffConfig::default(),
            subscriptions_uri: subscriptions_uri.into(),
        }
    }

    /// Sets the client metadata.
    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    /// Sets the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("/v3/Subscriptions")
    }
}

/// Configuration for retry backoff.
///
/// Delays start at `min_delay`, double per retry, are clamped to
/// `[min_delay, max_delay]` and scaled by a random factor in
/// `1 ± randomness`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Smallest delay between attempts.
    #[serde(with = "millis")]
    pub min_delay: Duration,
    /// Largest delay between attempts.
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Total time budget for one operation, retries included.
    #[serde(with = "millis")]
    pub max_attempts_time: Duration,
    /// Multiplicative jitter, as a fraction of the nominal delay.
    pub randomness: f64,
}

impl BackoffConfig {
    /// Default smallest delay.
    pub const MIN_DELAY: Duration = Duration::from_millis(4_000);
    /// Default largest delay.
    pub const MAX_DELAY: Duration = Duration::from_millis(60_000);
    /// Default time budget.
    pub const MAX_ATTEMPTS_TIME: Duration = Duration::from_millis(90_000);
    /// Default jitter.
    pub const RANDOMNESS: f64 = 0.2;

    /// Creates the default configuration without jitter.
    pub fn no_jitter() -> Self {
        Self::default().with_randomness(0.0)
    }

    /// Sets the smallest delay.
    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    /// Sets the largest delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the time budget.
    pub fn with_max_attempts_time(mut self, budget: Duration) -> Self {
        self.max_attempts_time = budget;
        self
    }

    /// Sets the jitter fraction, clamped to `[0, 1]`.
    pub fn with_randomness(mut self, randomness: f64) -> Self {
        self.randomness = randomness.clamp(0.0, 1.0);
        self
    }

    /// Nominal delay before retry number `retry` (0-indexed), before jitter.
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let factor = 2f64.powi(retry.min(31) as i32);
        let secs = self.min_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64())).max(self.min_delay)
    }

    /// Delay before retry number `retry` (0-indexed), jittered and clamped.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry).as_secs_f64();
        let factor = if self.randomness > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.randomness..=1.0 + self.randomness)
        } else {
            1.0
        };
        let secs = (nominal * factor)
            .min(self.max_delay.as_secs_f64())
            .max(self.min_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay: Self::MIN_DELAY,
            max_delay: Self::MAX_DELAY,
            max_attempts_time: Self::MAX_ATTEMPTS_TIME,
            randomness: Self::RANDOMNESS,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults() {
        let config = BackoffConfig::default();
        assert_eq!(config.min_delay, Duration::from_secs(4));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert_eq!(config.max_attempts_time, Duration::from_secs(90));
        assert!((config.randomness - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn nominal_delay_doubles_until_max() {
        let config = BackoffConfig::no_jitter();
        assert_eq!(config.delay_for_retry(0), Duration::from_secs(4));
        assert_eq!(config.delay_for_retry(1), Duration::from_secs(8));
        assert_eq!(config.delay_for_retry(2), Duration::from_secs(16));
        assert_eq!(config.delay_for_retry(3), Duration::from_secs(32));
        assert_eq!(config.delay_for_retry(4), Duration::from_secs(60));
        assert_eq!(config.delay_for_retry(40), Duration::from_secs(60));
    }

    #[test]
    fn config_from_json() {
        let config: SyncConfig = serde_json::from_str(
            r#"{
                "subscriptions_uri": "/v4/Subscriptions",
                "backoff": {"min_delay": 100, "max_delay": 1000}
            }"#,
        )
        .unwrap();

        assert_eq!(config.subscriptions_uri, "/v4/Subscriptions");
        assert_eq!(config.backoff.min_delay, Duration::from_millis(100));
        assert_eq!(config.backoff.max_delay, Duration::from_millis(1000));
        assert_eq!(config.backoff.max_attempts_time, Duration::from_secs(90));
    }

    #[test]
    fn randomness_is_clamped() {
        assert_eq!(BackoffConfig::default().with_randomness(3.0).randomness, 1.0);
        assert_eq!(BackoffConfig::default().with_randomness(-1.0).randomness, 0.0);
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_in_bounds(retry in 0u32..64) {
            let config = BackoffConfig::default();
            let delay = config.delay_for_retry(retry);
            let nominal = config.nominal_delay(retry).as_secs_f64();

            prop_assert!(delay >= config.min_delay);
            prop_assert!(delay <= config.max_delay);
            let secs = delay.as_secs_f64();
            prop_assert!(secs >= nominal * 0.8 - 1e-6 || delay == config.min_delay);
            prop_assert!(secs <= nominal * 1.2 + 1e-6);
        }
    }
}
