//! Command line interface for the adaptive sampler.
//!
//! The `dynsampler` binary replays recorded streams of keys through an
//! [`EmaSampleRate`](dynsampler_sampling::EmaSampleRate) to show how a given configuration would
//! sample real traffic:
//!
//! ```text
//! dynsampler --config ./config simulate --interval 1000 --seed 7 keys.txt
//! ```
//!
//! # Workspace Crates
//!
//!  - `dynsampler`: Main entry point and command line interface.
//!  - [`dynsampler-config`]: Static configuration for the CLI.
//!  - [`dynsampler-log`]: Logging facade and subscriber setup.
//!  - [`dynsampler-sampling`]: Adaptive per-key sample rates.
//!  - [`dynsampler-statsd`]: High-level StatsD metric client for internal measurements.
//!
//! [`dynsampler-config`]: ../dynsampler_config/index.html
//! [`dynsampler-log`]: ../dynsampler_log/index.html
//! [`dynsampler-sampling`]: ../dynsampler_sampling/index.html
//! [`dynsampler-statsd`]: ../dynsampler_statsd/index.html

mod cli;
mod setup;
mod simulate;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            dynsampler_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
