//! Tunables of the EMA sampler.

use serde::{Deserialize, Serialize};

/// Default weight of the newest interval in the moving average.
const DEFAULT_WEIGHT: f64 = 0.5;

/// Default floor below which a key is dropped from the moving average.
const DEFAULT_AGE_OUT_VALUE: f64 = 0.5;

/// Default target for the traffic-weighted average sample rate.
const DEFAULT_GOAL_SAMPLE_RATE: u64 = 10;

/// A configuration value that the sampler cannot work with.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum InvalidConfig {
    /// The weight must be in the half-open interval `(0, 1]`.
    #[error("weight must be greater than 0 and at most 1, got {0}")]
    Weight(f64),
    /// The age out value must be a finite, non-negative number.
    #[error("age out value must be a non-negative number, got {0}")]
    AgeOutValue(f64),
    /// A goal sample rate of `0` would mean dropping everything.
    #[error("goal sample rate must be at least 1")]
    GoalSampleRate,
}

/// Configuration of [`EmaSampleRate`](crate::EmaSampleRate).
///
/// All fields have defaults, so a partial configuration can be deserialized:
///
/// ```
/// use dynsampler_sampling::EmaConfig;
///
/// let config: EmaConfig = serde_json::from_str(r#"{"goal_sample_rate": 20}"#).unwrap();
/// assert_eq!(config.goal_sample_rate, 20);
/// assert_eq!(config.weight, 0.5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmaConfig {
    /// Weight of the most recent interval when folding counts into the moving average.
    ///
    /// Values close to `0` make the average stable and slow to react, `1` discards all history.
    pub weight: f64,

    /// Keys whose moving average drops below this value are forgotten.
    ///
    /// A forgotten key starts from scratch when it is seen again.
    pub age_out_value: f64,

    /// The desired average sample rate across all keys, weighted by traffic.
    ///
    /// Also returned for keys that have no computed sample rate yet.
    pub goal_sample_rate: u64,

    /// Maximum number of distinct keys counted per interval. `0` means unlimited.
    ///
    /// Once the limit is reached, occurrences of keys not yet counted in the current interval
    /// are ignored.
    pub max_keys: usize,
}

impl EmaConfig {
    /// Checks that all values are within their valid ranges.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if !(self.weight > 0.0 && self.weight <= 1.0) {
            return Err(InvalidConfig::Weight(self.weight));
        }

        if !(self.age_out_value.is_finite() && self.age_out_value >= 0.0) {
            return Err(InvalidConfig::AgeOutValue(self.age_out_value));
        }

        if self.goal_sample_rate == 0 {
            return Err(InvalidConfig::GoalSampleRate);
        }

        Ok(())
    }
}

impl Default for EmaConfig {
    fn default() -> Self {
        Self {
            weight: DEFAULT_WEIGHT,
            age_out_value: DEFAULT_AGE_OUT_VALUE,
            goal_sample_rate: DEFAULT_GOAL_SAMPLE_RATE,
            max_keys: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(EmaConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_weight_bounds() {
        for weight in [0.0, -0.1, 1.01, f64::NAN] {
            let config = EmaConfig {
                weight,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(InvalidConfig::Weight(_))));
        }

        let config = EmaConfig {
            weight: 1.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_age_out_value_bounds() {
        for age_out_value in [-1.0, f64::INFINITY, f64::NAN] {
            let config = EmaConfig {
                age_out_value,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(InvalidConfig::AgeOutValue(_))
            ));
        }

        let config = EmaConfig {
            age_out_value: 0.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_zero_goal_sample_rate() {
        let config = EmaConfig {
            goal_sample_rate: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(InvalidConfig::GoalSampleRate));
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "goal sample rate must be at least 1"
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EmaConfig = serde_yaml::from_str("weight: 0.2\nmax_keys: 500\n").unwrap();
        assert_eq!(
            config,
            EmaConfig {
                weight: 0.2,
                age_out_value: 0.5,
                goal_sample_rate: 10,
                max_keys: 500,
            }
        );
    }
}
