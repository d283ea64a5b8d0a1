//! Decayed per-key traffic estimates.

use std::collections::{BTreeMap, HashMap};

/// Exponential moving average of per-key occurrence counts.
///
/// Every call to [`fold_counts`](Self::fold_counts) represents one interval. Keys that receive no
/// occurrences in an interval are folded with a count of `0`, so their average decays by a factor
/// of `1 - weight` per interval until it falls below the age out value and the key is removed.
///
/// Averages are kept in key order, which the rate allocation relies on for stable rounding.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    weight: f64,
    age_out_value: f64,
    averages: BTreeMap<String, f64>,
}

impl MovingAverage {
    /// Creates an empty moving average.
    pub fn new(weight: f64, age_out_value: f64) -> Self {
        Self {
            weight,
            age_out_value,
            averages: BTreeMap::new(),
        }
    }

    /// Folds the counts of one interval into the averages and removes aged out keys.
    ///
    /// Returns the number of previously tracked keys that were aged out. A new key whose first
    /// average is already below the age out value is not tracked at all.
    pub fn fold_counts(&mut self, pending: &HashMap<String, f64>) -> usize {
        let weight = self.weight;
        let threshold = self.age_out_value;

        // New keys below the threshold are never tracked, so they do not count as aged out.
        let seeded: Vec<_> = pending
            .iter()
            .filter(|(key, _)| !self.averages.contains_key(key.as_str()))
            .map(|(key, &observed)| (key.clone(), blend(weight, observed, 0.0)))
            .filter(|&(_, average)| average >= threshold)
            .collect();

        for (key, average) in self.averages.iter_mut() {
            let observed = pending.get(key).copied().unwrap_or_default();
            *average = blend(weight, observed, *average);
        }

        let aged_out = self.age_out();
        self.averages.extend(seeded);

        aged_out
    }

    fn age_out(&mut self) -> usize {
        let threshold = self.age_out_value;
        let before = self.averages.len();

        self.averages.retain(|key, average| {
            let keep = *average >= threshold;
            if !keep {
                dynsampler_log::trace!(key = key.as_str(), average = *average, "aging out key");
            }
            keep
        });

        before - self.averages.len()
    }

    /// Returns the current average of a key, if it is tracked.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.averages.get(key).copied()
    }

    /// Returns all tracked averages in key order.
    pub fn averages(&self) -> &BTreeMap<String, f64> {
        &self.averages
    }

    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.averages.len()
    }

    /// Returns `true` if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.averages.is_empty()
    }
}

fn blend(weight: f64, observed: f64, previous: f64) -> f64 {
    weight * observed + (1.0 - weight) * previous
}
