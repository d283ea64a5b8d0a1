use std::env;
use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

/// All crates of the workspace, which log at full verbosity unless `RUST_LOG` says otherwise.
const CRATE_NAMES: &[&str] = &[
    "dynsampler",
    "dynsampler_config",
    "dynsampler_log",
    "dynsampler_sampling",
    "dynsampler_statsd",
];

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO dynsampler::setup: sampler goal rate: 10
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2024-12-04T12:10:32.123Z  INFO dynsampler::setup: sampler goal rate: 10
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2024-12-04T12:11:08.729716Z","level":"INFO","message":"sampler goal rate: 10","target":"dynsampler::setup","filename":"dynsampler/src/setup.rs","line_number":31}
    /// ```
    Json,
}

/// The maximum verbosity of emitted log messages.
///
/// Serialized as the lowercase level name, for instance `info` or `trace`. `off` disables
/// logging.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LogLevel(pub LevelFilter);

impl LogLevel {
    /// Returns the underlying [`LevelFilter`].
    pub fn level_filter(&self) -> LevelFilter {
        self.0
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // LevelFilter renders uppercase, configuration files use lowercase.
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

impl FromStr for LogLevel {
    type Err = tracing::level_filters::ParseLevelFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LevelFilter::from_str(s).map(Self)
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'_, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for dynsampler.
    pub level: LogLevel,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,

    /// When set to `true`, backtraces are forced on.
    ///
    /// Otherwise, backtraces can be enabled by setting the `RUST_BACKTRACE` variable to `full`.
    pub enable_backtraces: bool,
}

impl LogConfig {
    /// Returns the tracing [`LevelFilter`].
    pub fn level_filter(&self) -> LevelFilter {
        self.level.level_filter()
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel(LevelFilter::INFO),
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}

/// Returns the default filters for the workspace crates.
fn get_default_filters() -> EnvFilter {
    // Configure INFO as default for all third-party crates.
    let mut env_filter = EnvFilter::new("INFO");

    for name in CRATE_NAMES {
        if let Ok(directive) = format!("{name}=TRACE").parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    env_filter
}

/// Initialize the logging system.
///
/// Logs are written to `stderr`, so that standard output stays available for the command
/// output. If the `RUST_LOG` environment variable is set, it replaces the default per-crate
/// filters. Calling this function more than once has no effect.
///
/// # Example
///
/// ```
/// let log_config = dynsampler_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// dynsampler_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    if config.enable_backtraces {
        // SAFETY: called during startup before any threads are spawned.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let subscriber = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true);

    let format = match (config.format, console::user_attended_stderr()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => {
            subscriber.compact().without_time().boxed()
        }
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            subscriber.with_ansi(false).boxed()
        }
        (LogFormat::Json, _) => subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    let env_filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => EnvFilter::new(value),
        Err(_) => get_default_filters(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(config.level_filter()))
        .with(env_filter)
        .try_init()
        .ok();
}
