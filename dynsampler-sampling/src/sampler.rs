use std::collections::{BTreeMap, HashMap};

use dynsampler_statsd::metric;
use parking_lot::Mutex;
use serde::Serialize;

use crate::allocation::calculate_sample_rates;
use crate::config::{EmaConfig, InvalidConfig};
use crate::ema::MovingAverage;
use crate::statsd::{SamplerCounters, SamplerGauges, SamplerTimers};

/// A source of per-key sample rates.
///
/// A sample rate of `n` means that one out of `n` occurrences of a key should be kept. Every
/// occurrence must be counted towards the traffic estimate of its key, either with
/// [`get_sample_rate_multi`](Self::get_sample_rate_multi) or with
/// [`record_occurrence`](Self::record_occurrence). A plain
/// [`get_sample_rate`](Self::get_sample_rate) counts a key at most once per interval and is not
/// enough to drive the estimate on its own. The rates are refreshed by periodically calling
/// [`recompute`](Self::recompute) from the host, for instance from a timer.
pub trait Sampler: Send + Sync {
    /// Returns the sample rate of a key.
    ///
    /// Keys without a computed sample rate receive the goal sample rate. A key without a pending
    /// count in the current interval is counted once, further lookups do not count.
    fn get_sample_rate(&self, key: &str) -> u64;

    /// Counts `count` occurrences of a key and returns its sample rate.
    fn get_sample_rate_multi(&self, key: &str, count: u64) -> u64;

    /// Counts a single occurrence of a key without looking up its rate.
    fn record_occurrence(&self, key: &str);

    /// Folds all occurrences counted since the last call into the traffic estimate and replaces
    /// the published sample rates.
    fn recompute(&self);

    /// Returns counters describing the activity of the sampler.
    fn metrics(&self) -> SamplerMetrics;
}

/// A snapshot of the activity counters of a [`Sampler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SamplerMetrics {
    /// Number of sample rate lookups.
    pub request_count: u64,
    /// Number of occurrences counted, including batches.
    pub event_count: u64,
    /// Number of keys currently tracked by the moving average.
    pub keyspace_size: u64,
    /// Number of completed recompute cycles.
    pub interval_count: u64,
}

#[derive(Debug)]
struct State {
    current_counts: HashMap<String, f64>,
    moving_average: MovingAverage,
    saved_sample_rates: BTreeMap<String, u64>,
    request_count: u64,
    event_count: u64,
    interval_count: u64,
    /// Occurrences ignored due to `max_keys` since the last recompute.
    dropped_count: u64,
}

impl State {
    fn count(&mut self, key: &str, count: u64, max_keys: usize) {
        if count == 0 {
            return;
        }

        if let Some(pending) = self.current_counts.get_mut(key) {
            *pending += count as f64;
        } else if max_keys > 0 && self.current_counts.len() >= max_keys {
            self.dropped_count = self.dropped_count.saturating_add(count);
            return;
        } else {
            self.current_counts.insert(key.to_owned(), count as f64);
        }

        self.event_count = self.event_count.saturating_add(count);
    }

    fn sample_rate(&self, key: &str, goal_sample_rate: u64) -> u64 {
        self.saved_sample_rates
            .get(key)
            .copied()
            .unwrap_or(goal_sample_rate)
    }
}

/// Sample rates derived from an exponential moving average of per-key traffic.
///
/// The sampler tracks how often every key occurs between two recomputes. On [`recompute`], these
/// counts are folded into a moving average, keys whose average decayed below the configured
/// [`age_out_value`](EmaConfig::age_out_value) are forgotten, and new sample rates are allocated
/// so that the traffic-weighted average rate approximates the
/// [`goal_sample_rate`](EmaConfig::goal_sample_rate). Rare keys are kept in full while busy keys
/// are sampled down.
///
/// All state lives behind a single lock, so the sampler can be shared across threads. It never
/// spawns threads itself; the host is responsible for calling [`recompute`] periodically.
///
/// [`recompute`]: Sampler::recompute
#[derive(Debug)]
pub struct EmaSampleRate {
    config: EmaConfig,
    state: Mutex<State>,
}

impl EmaSampleRate {
    /// Creates a sampler after validating its configuration.
    pub fn new(config: EmaConfig) -> Result<Self, InvalidConfig> {
        config.validate()?;

        let moving_average = MovingAverage::new(config.weight, config.age_out_value);
        Ok(Self {
            config,
            state: Mutex::new(State {
                current_counts: HashMap::new(),
                moving_average,
                saved_sample_rates: BTreeMap::new(),
                request_count: 0,
                event_count: 0,
                interval_count: 0,
                dropped_count: 0,
            }),
        })
    }

    /// Returns the configuration of this sampler.
    pub fn config(&self) -> &EmaConfig {
        &self.config
    }

    /// Returns a copy of the sample rates published by the last recompute.
    pub fn sample_rates(&self) -> BTreeMap<String, u64> {
        self.state.lock().saved_sample_rates.clone()
    }

    /// Returns a copy of the moving average of every tracked key.
    pub fn moving_averages(&self) -> BTreeMap<String, f64> {
        self.state.lock().moving_average.averages().clone()
    }
}

impl Sampler for EmaSampleRate {
    /// Returns the sample rate of a key.
    ///
    /// If the key has not been counted since the last recompute, this counts it once. A key that
    /// is only ever looked up through this method is thereby tracked from its first occurrence,
    /// but repeated lookups within one interval are not counted again.
    fn get_sample_rate(&self, key: &str) -> u64 {
        let mut state = self.state.lock();
        state.request_count = state.request_count.saturating_add(1);

        if !state.current_counts.contains_key(key) {
            state.count(key, 1, self.config.max_keys);
        }

        state.sample_rate(key, self.config.goal_sample_rate)
    }

    fn get_sample_rate_multi(&self, key: &str, count: u64) -> u64 {
        let mut state = self.state.lock();
        state.request_count = state.request_count.saturating_add(1);
        state.count(key, count, self.config.max_keys);
        state.sample_rate(key, self.config.goal_sample_rate)
    }

    fn record_occurrence(&self, key: &str) {
        self.state.lock().count(key, 1, self.config.max_keys);
    }

    fn recompute(&self) {
        let (keyspace_size, busy_keys, aged_out, dropped) =
            metric!(timer(SamplerTimers::RecomputeDuration), {
                let mut state = self.state.lock();

                let pending = std::mem::take(&mut state.current_counts);
                let aged_out = state.moving_average.fold_counts(&pending);

                let sample_rates = calculate_sample_rates(
                    self.config.goal_sample_rate,
                    state.moving_average.averages(),
                );
                let busy_keys = sample_rates.values().filter(|&&rate| rate > 1).count();

                state.saved_sample_rates = sample_rates;
                state.interval_count += 1;

                let dropped = std::mem::take(&mut state.dropped_count);
                (state.moving_average.len(), busy_keys, aged_out, dropped)
            });

        dynsampler_log::debug!(
            keyspace_size,
            busy_keys,
            aged_out,
            dropped,
            "recomputed sample rates"
        );

        metric!(gauge(SamplerGauges::KeyspaceSize) = keyspace_size as u64);
        metric!(gauge(SamplerGauges::BusyKeys) = busy_keys as u64);
        metric!(counter(SamplerCounters::AgedOut) += aged_out as i64);
        metric!(
            counter(SamplerCounters::DroppedKeys) += i64::try_from(dropped).unwrap_or(i64::MAX)
        );
    }

    fn metrics(&self) -> SamplerMetrics {
        let state = self.state.lock();
        SamplerMetrics {
            request_count: state.request_count,
            event_count: state.event_count,
            keyspace_size: state.moving_average.len() as u64,
            interval_count: state.interval_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn golden_sampler() -> EmaSampleRate {
        EmaSampleRate::new(EmaConfig {
            weight: 0.2,
            age_out_value: 0.2,
            goal_sample_rate: 20,
            max_keys: 0,
        })
        .unwrap()
    }

    fn rates(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
        entries
            .iter()
            .map(|&(key, rate)| (key.to_owned(), rate))
            .collect()
    }

    /// Feeds the same counts for enough intervals that the moving average converges.
    fn converged_rates(counts: &[(&str, u64)]) -> BTreeMap<String, u64> {
        let sampler = golden_sampler();
        for _ in 0..101 {
            for &(key, count) in counts {
                sampler.get_sample_rate_multi(key, count);
            }
            sampler.recompute();
        }
        sampler.sample_rates()
    }

    fn assert_monotonic(counts: &[(&str, u64)], rates: &BTreeMap<String, u64>) {
        for &(key_a, count_a) in counts {
            for &(key_b, count_b) in counts {
                if count_a > count_b {
                    assert!(
                        rates[key_a] >= rates[key_b],
                        "{key_a} ({count_a}) got a lower rate than {key_b} ({count_b})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_wide_spread_of_counts() {
        let counts = [
            ("one", 1),
            ("two", 1),
            ("three", 2),
            ("four", 5),
            ("five", 8),
            ("six", 15),
            ("seven", 45),
            ("eight", 612),
            ("nine", 2000),
            ("ten", 10000),
        ];

        let actual = converged_rates(&counts);
        similar_asserts::assert_eq!(
            actual,
            rates(&[
                ("one", 1),
                ("two", 1),
                ("three", 1),
                ("four", 1),
                ("five", 1),
                ("six", 1),
                ("seven", 1),
                ("eight", 6),
                ("nine", 14),
                ("ten", 47),
            ])
        );
        assert_monotonic(&counts, &actual);
    }

    #[test]
    fn test_narrow_spread_of_counts() {
        let counts = [
            ("one", 1),
            ("two", 1),
            ("three", 2),
            ("four", 5),
            ("five", 8),
            ("six", 15),
            ("seven", 45),
            ("eight", 50),
            ("nine", 60),
        ];

        let actual = converged_rates(&counts);
        similar_asserts::assert_eq!(
            actual,
            rates(&[
                ("one", 1),
                ("two", 1),
                ("three", 2),
                ("four", 5),
                ("five", 8),
                ("six", 11),
                ("seven", 24),
                ("eight", 26),
                ("nine", 30),
            ])
        );
        assert_monotonic(&counts, &actual);
    }

    #[test]
    fn test_low_traffic_is_sampled_at_count() {
        let counts = [("one", 1), ("two", 1), ("three", 2), ("four", 5), ("five", 7)];

        let actual = converged_rates(&counts);
        similar_asserts::assert_eq!(actual, rates(&counts));
        assert_monotonic(&counts, &actual);
    }

    #[test]
    fn test_high_traffic() {
        let counts = [
            ("one", 1000),
            ("two", 1000),
            ("three", 2000),
            ("four", 5000),
            ("five", 7000),
        ];

        let actual = converged_rates(&counts);
        similar_asserts::assert_eq!(
            actual,
            rates(&[
                ("one", 7),
                ("two", 7),
                ("three", 13),
                ("four", 29),
                ("five", 39),
            ])
        );
        assert_monotonic(&counts, &actual);
    }

    #[test]
    fn test_equal_traffic_gets_goal_rate() {
        let counts = [
            ("one", 6000),
            ("two", 6000),
            ("three", 6000),
            ("four", 6000),
            ("five", 6000),
        ];

        let actual = converged_rates(&counts);
        similar_asserts::assert_eq!(
            actual,
            rates(&[
                ("one", 20),
                ("two", 20),
                ("three", 20),
                ("four", 20),
                ("five", 20),
            ])
        );
    }

    #[test]
    fn test_single_key_gets_goal_rate() {
        similar_asserts::assert_eq!(converged_rates(&[("one", 12000)]), rates(&[("one", 20)]));
    }

    #[test]
    fn test_no_traffic() {
        assert_eq!(converged_rates(&[]), BTreeMap::new());
    }

    #[test]
    fn test_startup_returns_goal_rate() {
        let sampler = EmaSampleRate::new(EmaConfig::default()).unwrap();

        assert_eq!(sampler.get_sample_rate("key"), 10);
        assert_eq!(sampler.state.lock().current_counts.get("key"), Some(&1.0));

        // A second lookup in the same interval does not count again.
        assert_eq!(sampler.get_sample_rate("key"), 10);
        assert_eq!(sampler.state.lock().current_counts.get("key"), Some(&1.0));
    }

    #[test]
    fn test_lookups_count_once_per_interval() {
        let lookups = golden_sampler();
        let counted = golden_sampler();

        for _ in 0..20 {
            for _ in 0..10_000 {
                lookups.get_sample_rate("GET /health");
                counted.get_sample_rate_multi("GET /health", 1);
            }
            lookups.get_sample_rate("POST /checkout");
            counted.get_sample_rate_multi("POST /checkout", 1);

            lookups.recompute();
            counted.recompute();
        }

        assert_eq!(lookups.metrics().event_count, 40);
        assert_eq!(lookups.get_sample_rate("GET /health"), 1);

        assert_eq!(counted.metrics().event_count, 200_020);
        assert_eq!(counted.get_sample_rate("GET /health"), 20);
        assert_eq!(counted.get_sample_rate("POST /checkout"), 1);
    }

    #[test]
    fn test_counters_saturate() {
        let sampler = EmaSampleRate::new(EmaConfig {
            max_keys: 1,
            ..golden_sampler().config().clone()
        })
        .unwrap();

        sampler.get_sample_rate_multi("a", u64::MAX);
        sampler.get_sample_rate_multi("a", 1);
        sampler.get_sample_rate_multi("b", u64::MAX);
        sampler.get_sample_rate_multi("b", 1);
        assert_eq!(sampler.metrics().event_count, u64::MAX);

        let captures = dynsampler_statsd::with_capturing_test_client(|| sampler.recompute());
        assert!(
            captures.contains(&format!("sampler.keys.dropped:{}|c", i64::MAX)),
            "{captures:?}"
        );
        assert_eq!(sampler.sample_rates().keys().collect::<Vec<_>>(), ["a"]);
    }

    #[test]
    fn test_unknown_key_after_recompute() {
        let sampler = golden_sampler();
        for _ in 0..10 {
            sampler.get_sample_rate_multi("busy", 10_000);
            sampler.recompute();
        }

        assert_eq!(sampler.get_sample_rate("never-seen"), 20);
    }

    #[test]
    fn test_record_occurrence_counts() {
        let sampler = golden_sampler();
        for _ in 0..5 {
            sampler.record_occurrence("key");
        }
        sampler.get_sample_rate_multi("key", 0);

        assert_eq!(sampler.state.lock().current_counts.get("key"), Some(&5.0));
        sampler.recompute();
        assert!(sampler.state.lock().current_counts.is_empty());
        assert_eq!(sampler.moving_averages().get("key"), Some(&1.0));
    }

    #[test]
    fn test_aging_out() {
        let sampler = golden_sampler();

        for _ in 0..100 {
            sampler.get_sample_rate_multi("foo", 500);
            sampler.recompute();
        }
        assert_eq!(sampler.moving_averages()["foo"].round(), 500.0);

        for _ in 0..100 {
            sampler.record_occurrence("asdf");
            sampler.recompute();
        }

        let averages = sampler.moving_averages();
        assert!(!averages.contains_key("foo"));
        assert!(averages.contains_key("asdf"));
        assert!(!sampler.sample_rates().contains_key("foo"));
    }

    #[test]
    fn test_max_keys() {
        let sampler = EmaSampleRate::new(EmaConfig {
            max_keys: 2,
            ..golden_sampler().config().clone()
        })
        .unwrap();

        sampler.record_occurrence("a");
        sampler.record_occurrence("b");
        sampler.record_occurrence("c");
        sampler.record_occurrence("a");

        // Dropped keys still receive a rate.
        assert_eq!(sampler.get_sample_rate("d"), 20);

        let captures = dynsampler_statsd::with_capturing_test_client(|| sampler.recompute());

        assert_eq!(
            sampler.moving_averages().keys().collect::<Vec<_>>(),
            ["a", "b"]
        );
        assert!(captures.contains(&"sampler.keys.dropped:2|c".to_owned()), "{captures:?}");

        // The limit applies per interval.
        sampler.record_occurrence("c");
        sampler.recompute();
        assert!(sampler.moving_averages().contains_key("c"));
    }

    #[test]
    fn test_recompute_metrics() {
        let sampler = golden_sampler();
        sampler.get_sample_rate_multi("busy", 1000);
        sampler.get_sample_rate_multi("rare", 1);

        let captures = dynsampler_statsd::with_capturing_test_client(|| sampler.recompute());

        assert_eq!(captures.len(), 3, "{captures:?}");
        assert!(captures[0].starts_with("sampler.recompute.duration:"));
        assert!(captures[0].contains("|d"));
        assert_eq!(captures[1], "sampler.keyspace.size:2|g");
        assert_eq!(captures[2], "sampler.keys.busy:1|g");
    }

    #[test]
    fn test_sampler_metrics() {
        let sampler = golden_sampler();
        sampler.get_sample_rate("a");
        sampler.get_sample_rate("a");
        sampler.get_sample_rate_multi("b", 4);
        sampler.record_occurrence("c");
        sampler.recompute();

        insta::assert_json_snapshot!(sampler.metrics(), @r###"
        {
          "request_count": 3,
          "event_count": 6,
          "keyspace_size": 3,
          "interval_count": 1
        }
        "###);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = EmaSampleRate::new(EmaConfig {
            weight: 0.0,
            ..Default::default()
        });
        assert!(matches!(result, Err(InvalidConfig::Weight(_))));
    }

    #[test]
    fn test_shared_as_trait_object() {
        let sampler: std::sync::Arc<dyn Sampler> = std::sync::Arc::new(golden_sampler());
        assert_eq!(sampler.get_sample_rate_multi("key", 3), 20);
        sampler.recompute();
        assert_eq!(sampler.get_sample_rate("key"), 1);
    }
}
