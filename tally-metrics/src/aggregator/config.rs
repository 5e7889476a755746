use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The upper bound for [`AggregatorConfig::percentile_threshold`].
pub const MAX_PERCENTILE: u8 = 100;

/// Parameters used by the [`Aggregator`](crate::Aggregator).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Seconds between two flushes of the aggregator.
    ///
    /// All samples received within an interval are reported with the timestamp of the flush that
    /// ends it. Defaults to `10`.
    pub flush_interval: u64,

    /// The percentile used to summarize timers, in `1..=100`.
    ///
    /// Every flushed timer reports the upper bound and the mean of the lowest `P` percent of its
    /// durations as `upper_<P>` and `mean`. Defaults to `100`, which covers all durations.
    pub percentile_threshold: u8,
}

impl AggregatorConfig {
    /// Returns the time between two flushes as [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }

    /// Returns the configured percentile, clamped to the valid range `1..=100`.
    pub fn percentile_threshold(&self) -> u8 {
        self.percentile_threshold.clamp(1, MAX_PERCENTILE)
    }

    /// Returns `true` if all values are within their valid range.
    pub fn is_valid(&self) -> bool {
        self.flush_interval > 0 && (1..=MAX_PERCENTILE).contains(&self.percentile_threshold)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_interval: 10,
            percentile_threshold: MAX_PERCENTILE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: AggregatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AggregatorConfig::default());
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.percentile_threshold(), 100);
        assert!(config.is_valid());
    }

    #[test]
    fn test_partial() {
        let config: AggregatorConfig =
            serde_json::from_str(r#"{"percentile_threshold": 90}"#).unwrap();
        assert_eq!(config.percentile_threshold(), 90);
        assert_eq!(config.flush_interval, 10);
    }

    #[test]
    fn test_out_of_range() {
        let config = AggregatorConfig {
            flush_interval: 0,
            percentile_threshold: 0,
        };
        assert!(!config.is_valid());
        assert_eq!(config.percentile_threshold(), 1);
    }
}
