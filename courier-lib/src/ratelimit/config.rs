use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString, VariantNames};

/// Default period between two reclaimer sweeps
const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(10);

/// Default time a bucket must be past its reset before it can be reclaimed
const DEFAULT_RECLAIM_GRACE: Duration = Duration::from_secs(10);

/// Default minimum delay of a pre-emptively blocked request
const DEFAULT_BLOCK_GRACE: Duration = Duration::from_millis(100);

/// Unit of plain numeric `Retry-After` values
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RetryAfterPrecision {
    /// `Retry-After: 1500` means 1.5 seconds.
    ///
    /// Requests announce this with `X-RateLimit-Precision: millisecond`.
    #[default]
    Milliseconds,
    /// `Retry-After: 1.5` means 1.5 seconds
    Seconds,
}

/// Rate limiting configuration shared by all buckets of a client
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Use the relative `X-RateLimit-Reset-After` header instead of the
    /// absolute `X-RateLimit-Reset` header to schedule window resets.
    ///
    /// Relative timing is immune to clock differences between client and server.
    pub use_relative_ratelimit: bool,

    /// Replace the server's reset delay with a fixed value.
    ///
    /// Only useful for testing.
    #[serde(with = "humantime_serde")]
    pub wait_override: Option<Duration>,

    /// Unit of numeric `Retry-After` values
    pub retry_after_precision: RetryAfterPrecision,

    /// Period between two sweeps of the bucket reclaimer
    #[serde(with = "humantime_serde")]
    pub reclaim_interval: Duration,

    /// How long past its reset an idle bucket is kept before it is reclaimed
    #[serde(with = "humantime_serde")]
    pub reclaim_grace: Duration,

    /// Minimum delay applied to a request blocked by the local throttle
    #[serde(with = "humantime_serde")]
    pub block_grace: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            use_relative_ratelimit: true,
            wait_override: None,
            retry_after_precision: RetryAfterPrecision::default(),
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
            reclaim_grace: DEFAULT_RECLAIM_GRACE,
            block_grace: DEFAULT_BLOCK_GRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_default_rate_limit_config() {
        let config = RateLimitConfig::default();
        assert!(config.use_relative_ratelimit);
        assert_eq!(config.wait_override, None);
        assert_eq!(config.reclaim_interval, Duration::from_secs(10));
        assert_eq!(config.reclaim_grace, Duration::from_secs(10));
        assert_eq!(config.block_grace, Duration::from_millis(100));
        assert_eq!(
            config.retry_after_precision,
            RetryAfterPrecision::Milliseconds
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = RateLimitConfig {
            use_relative_ratelimit: false,
            wait_override: Some(Duration::from_secs(2)),
            retry_after_precision: RetryAfterPrecision::Seconds,
            reclaim_interval: Duration::from_secs(30),
            ..RateLimitConfig::default()
        };

        let toml = toml::to_string(&config).unwrap();
        let deserialized: RateLimitConfig = toml::from_str(&toml).unwrap();

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RateLimitConfig = toml::from_str(
            r#"
            use_relative_ratelimit = false
            reclaim_grace = "1m"
            "#,
        )
        .unwrap();

        assert!(!config.use_relative_ratelimit);
        assert_eq!(config.reclaim_grace, Duration::from_secs(60));
        assert_eq!(config.reclaim_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result: Result<RateLimitConfig, _> = toml::from_str("concurrency = 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_precision_from_str() {
        assert_eq!(
            RetryAfterPrecision::from_str("Seconds").unwrap(),
            RetryAfterPrecision::Seconds
        );
        assert_eq!(RetryAfterPrecision::Milliseconds.to_string(), "milliseconds");
    }
}
