//! Adaptive per-key sample rates.
//!
//! Services that emit one event per request often see a handful of keys (endpoints, customers,
//! status codes) account for almost all traffic. Sampling every key at the same rate either keeps
//! too much of the busy keys or loses the rare ones entirely. This crate computes a sample rate per
//! key instead, so that rare keys are kept in full and busy keys are sampled down, while the
//! overall volume stays close to a configured goal.
//!
//! # How It Works
//!
//! - Callers report every occurrence of a key through [`Sampler::get_sample_rate_multi`] or
//!   [`Sampler::record_occurrence`] and keep the occurrence with a probability of `1 / rate`.
//!   [`Sampler::get_sample_rate`] only counts a key once per interval, so that looking up a rate
//!   repeatedly does not inflate its traffic.
//! - The host calls [`Sampler::recompute`] periodically. Each call is one interval: the counts of
//!   the interval are folded into an exponential moving average per key, keys whose average
//!   decayed below [`EmaConfig::age_out_value`] are forgotten, and new rates are allocated.
//! - The allocation gives every key a share of the total budget proportional to the logarithm of
//!   its traffic. Keys that need less than their share receive a rate of `1` and pass the remaining
//!   budget on to other keys.
//!
//! # Example
//!
//! ```
//! use dynsampler_sampling::{EmaConfig, EmaSampleRate, Sampler};
//!
//! let sampler = EmaSampleRate::new(EmaConfig {
//!     goal_sample_rate: 20,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! // Until the first recompute, every key is sampled at the goal rate.
//! assert_eq!(sampler.get_sample_rate("GET /health"), 20);
//!
//! for _ in 0..10 {
//!     sampler.get_sample_rate_multi("GET /health", 10_000);
//!     sampler.get_sample_rate_multi("POST /checkout", 3);
//!     sampler.recompute();
//! }
//!
//! assert!(sampler.get_sample_rate("GET /health") > 20);
//! assert_eq!(sampler.get_sample_rate("POST /checkout"), 1);
//! ```
#![warn(missing_docs)]

mod allocation;
mod config;
mod ema;
mod sampler;
mod statsd;

pub use self::allocation::*;
pub use self::config::*;
pub use self::ema::*;
pub use self::sampler::*;
