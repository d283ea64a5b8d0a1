use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dynsampler_config::{Config, OverridableConfig};
use dynsampler_sampling::EmaSampleRate;
use rand::SeedableRng;
use rand_pcg::Pcg32;

use crate::setup;
use crate::simulate;

/// Computes adaptive per-key sample rates from streams of keys.
#[derive(Debug, Parser)]
#[command(name = "dynsampler", version, about)]
struct Cli {
    /// The path to the config folder.
    #[arg(short, long, global = true, env = "DYNSAMPLER_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// The log level, for instance `info` or `trace`.
    #[arg(long, global = true, env = "DYNSAMPLER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Hostname and port of a statsd server to report internal metrics to.
    #[arg(long, global = true, env = "DYNSAMPLER_STATSD")]
    statsd: Option<String>,

    /// Common prefix of all reported metrics.
    #[arg(long, global = true, env = "DYNSAMPLER_METRICS_PREFIX")]
    metrics_prefix: Option<String>,

    #[command(flatten)]
    sampler: SamplerArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides of the `sampler` config section.
#[derive(Debug, Args)]
struct SamplerArgs {
    /// Weight of the most recent interval in the moving average, in `(0, 1]`.
    #[arg(long, global = true, env = "DYNSAMPLER_WEIGHT")]
    weight: Option<String>,

    /// Keys whose moving average drops below this value are forgotten.
    #[arg(long, global = true, env = "DYNSAMPLER_AGE_OUT_VALUE")]
    age_out_value: Option<String>,

    /// The desired average sample rate across all keys.
    #[arg(long, global = true, env = "DYNSAMPLER_GOAL_SAMPLE_RATE")]
    goal_sample_rate: Option<String>,

    /// Maximum number of distinct keys counted per interval, `0` for unlimited.
    #[arg(long, global = true, env = "DYNSAMPLER_MAX_KEYS")]
    max_keys: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Replay a stream of keys through the sampler and report the outcome as JSON.
    Simulate(SimulateArgs),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as YAML.
    Show,
}

#[derive(Debug, Args)]
struct SimulateArgs {
    /// File with one key per line. Reads from stdin if omitted or `-`.
    input: Option<PathBuf>,

    /// Number of events between two recomputes of the sample rates.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Seed of the random number generator that makes keep or drop decisions.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl Cli {
    fn overrides(&self) -> OverridableConfig {
        OverridableConfig {
            log_level: self.log_level.clone(),
            statsd: self.statsd.clone(),
            metrics_prefix: self.metrics_prefix.clone(),
            weight: self.sampler.weight.clone(),
            age_out_value: self.sampler.age_out_value.clone(),
            goal_sample_rate: self.sampler.goal_sample_rate.clone(),
            max_keys: self.sampler.max_keys.clone(),
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    config.apply_override(cli.overrides())?;
    Ok(config)
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    setup::init_logging(&config);

    match cli.command {
        Command::Config(ConfigCommand::Show) => show_config(&config),
        Command::Simulate(args) => run_simulation(&config, args),
    }
}

fn show_config(config: &Config) -> Result<()> {
    let yaml = config.to_yaml_string()?;
    io::stdout().lock().write_all(yaml.as_bytes())?;
    Ok(())
}

fn run_simulation(config: &Config, args: SimulateArgs) -> Result<()> {
    setup::dump_spawn_infos(config);
    setup::init_metrics(config)?;

    let input: Box<dyn BufRead> = match args.input {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        _ => Box::new(io::stdin().lock()),
    };

    let sampler = EmaSampleRate::new(config.sampler().clone())?;
    let mut rng = Pcg32::seed_from_u64(args.seed);

    let report = simulate::run(&sampler, input, args.interval, &mut rng)
        .context("failed to read keys")?;

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report)?;
    writeln!(stdout)?;

    Ok(())
}
