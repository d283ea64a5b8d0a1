use std::collections::BTreeMap;
use std::io::{self, BufRead};

use dynsampler_sampling::{EmaSampleRate, Sampler, SamplerMetrics};
use rand::Rng;
use serde::Serialize;

/// Number of events seen and kept for a single key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    pub seen: u64,
    pub kept: u64,
}

/// Outcome of replaying a stream of keys.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Sample rates published by the last recompute.
    pub sample_rates: BTreeMap<String, u64>,
    pub keys: BTreeMap<String, KeyStats>,
    pub total: KeyStats,
    pub metrics: SamplerMetrics,
}

/// Replays newline-separated keys through `sampler`.
///
/// Every line is one event. An event with sample rate `n` is kept with a probability of `1 / n`.
/// The sampler is recomputed after every `interval` events and once more at the end if events are
/// pending. Blank lines are skipped.
pub fn run<R: Rng>(
    sampler: &EmaSampleRate,
    input: impl BufRead,
    interval: u64,
    rng: &mut R,
) -> io::Result<SimulationReport> {
    let interval = interval.max(1);
    let mut keys = BTreeMap::<String, KeyStats>::new();
    let mut total = KeyStats::default();
    let mut pending = 0;

    for line in input.lines() {
        let line = line?;
        let key = line.trim();
        if key.is_empty() {
            continue;
        }

        let rate = sampler.get_sample_rate_multi(key, 1);
        let keep = rng.random_range(0..rate.max(1)) == 0;

        let stats = keys.entry(key.to_owned()).or_default();
        stats.seen += 1;
        total.seen += 1;
        if keep {
            stats.kept += 1;
            total.kept += 1;
        }

        pending += 1;
        if pending == interval {
            sampler.recompute();
            pending = 0;
        }
    }

    if pending > 0 {
        sampler.recompute();
    }

    dynsampler_log::debug!(
        seen = total.seen,
        kept = total.kept,
        keys = keys.len(),
        "finished simulation"
    );

    Ok(SimulationReport {
        sample_rates: sampler.sample_rates(),
        keys,
        total,
        metrics: sampler.metrics(),
    })
}
