//! Distribution of a sampling budget across keys.
//!
//! Every key receives a share of the total budget proportional to the logarithm of its traffic.
//! Rare keys therefore end up with low sample rates (often `1`, keeping every occurrence) while
//! busy keys absorb most of the reduction. Budget that a key cannot use, because keeping all of
//! its occurrences costs less than its share, is carried over to the keys that follow it.

use std::collections::BTreeMap;

/// Computes sample rates for a snapshot of per-key traffic estimates.
///
/// The traffic-weighted average of the returned rates approximates `goal_sample_rate`. Every
/// returned rate is at least `1`, and the result contains exactly the keys of `averages`.
///
/// Keys are visited in their sort order, so the same input always produces the same output.
pub fn calculate_sample_rates(
    goal_sample_rate: u64,
    averages: &BTreeMap<String, f64>,
) -> BTreeMap<String, u64> {
    if averages.is_empty() {
        return BTreeMap::new();
    }

    let goal_sample_rate = goal_sample_rate.max(1) as f64;

    let mut total_count = 0.0;
    let mut log_sum = 0.0;
    for &average in averages.values() {
        let count = average.max(1.0);
        total_count += count;
        log_sum += count.log10();
    }

    // Every key has at most one occurrence per interval, which leaves nothing to weigh.
    if log_sum <= 0.0 {
        return averages.keys().map(|key| (key.clone(), 1)).collect();
    }

    let goal_count = total_count / goal_sample_rate;
    let goal_ratio = goal_count / log_sum;

    let mut sample_rates = BTreeMap::new();
    let mut remaining = averages.len() as f64;
    let mut extra = 0.0;

    for (key, &average) in averages {
        let count = average.max(1.0);
        let mut goal_for_key = (count.log10() * goal_ratio).max(1.0);

        let extra_for_key = extra / remaining;
        goal_for_key += extra_for_key;
        extra -= extra_for_key;
        remaining -= 1.0;

        let rate = if count <= goal_for_key {
            extra += goal_for_key - count;
            1
        } else {
            let rate = (count / goal_for_key).ceil();
            let rate = if rate.is_finite() && rate >= 1.0 {
                rate
            } else {
                1.0
            };
            extra += goal_for_key - count / rate;
            rate as u64
        };

        sample_rates.insert(key.clone(), rate);
    }

    sample_rates
}
