use anyhow::{Context, Result};
use dynsampler_config::Config;
use dynsampler_statsd::MetricsConfig;

/// Initialize the logging system from the `logging` section.
pub fn init_logging(config: &Config) {
    dynsampler_log::init(config.logging());
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        dynsampler_log::info!("launching dynsampler without config folder");
    } else {
        dynsampler_log::info!(
            "launching dynsampler from config folder {}",
            config.path().display()
        );
    }

    let sampler = config.sampler();
    dynsampler_log::info!("  goal sample rate: {}", sampler.goal_sample_rate);
    dynsampler_log::info!("  weight: {}", sampler.weight);
    dynsampler_log::info!("  age out value: {}", sampler.age_out_value);
    match sampler.max_keys {
        0 => dynsampler_log::info!("  max keys: unlimited"),
        max_keys => dynsampler_log::info!("  max keys: {max_keys}"),
    }
    dynsampler_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    dynsampler_statsd::init(MetricsConfig {
        prefix: config.metrics_prefix().to_owned(),
        host: host.to_owned(),
        buffer_size: config.metrics_buffer_size(),
        default_tags,
        sample_rate: config.metrics_sample_rate(),
    })
    .with_context(|| format!("failed to set up statsd reporting to {host}"))?;

    Ok(())
}
