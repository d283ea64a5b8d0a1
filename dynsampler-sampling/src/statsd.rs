use dynsampler_statsd::{CounterMetric, GaugeMetric, TimerMetric};

pub enum SamplerTimers {
    /// Time spent folding counts, aging out keys and allocating new sample rates.
    RecomputeDuration,
}

impl TimerMetric for SamplerTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::RecomputeDuration => "sampler.recompute.duration",
        }
    }
}

pub enum SamplerGauges {
    /// Number of keys tracked by the moving average after a recompute.
    KeyspaceSize,
    /// Number of keys with a sample rate greater than `1` after a recompute.
    BusyKeys,
}

impl GaugeMetric for SamplerGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::KeyspaceSize => "sampler.keyspace.size",
            Self::BusyKeys => "sampler.keys.busy",
        }
    }
}

pub enum SamplerCounters {
    /// Number of keys removed from the moving average because their traffic decayed.
    AgedOut,
    /// Number of occurrences ignored because the per-interval key limit was reached.
    DroppedKeys,
}

impl CounterMetric for SamplerCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::AgedOut => "sampler.keys.aged_out",
            Self::DroppedKeys => "sampler.keys.dropped",
        }
    }
}
