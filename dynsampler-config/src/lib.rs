//! Configuration for the dynsampler CLI.
//!
//! The configuration is read from a `config.yml` file inside a configuration directory. Every
//! section and every field is optional:
//!
//! ```yaml
//! logging:
//!   level: debug
//!   format: json
//! metrics:
//!   statsd: 127.0.0.1:8125
//!   prefix: dynsampler
//! sampler:
//!   weight: 0.2
//!   age_out_value: 0.2
//!   goal_sample_rate: 20
//! ```
//!
//! Individual values can be overridden from the command line or the environment with
//! [`OverridableConfig`].
#![warn(missing_docs)]

mod config;

pub use self::config::*;
