use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use sitespeed::config::{RunSettings, default_config_path};
use sitespeed::measure_site_list;
use sitespeed::report::{ReportFormat, render, write_report};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sitespeed", version, about = "Measure page loading speed with PageSpeed Insights", long_about = None)]
struct Args {
    /// Path to the site list. Each row holds one site, ends with a comma and
    /// may be wrapped in double quotes.
    #[arg(long, value_name = "PATH")]
    sites: PathBuf,

    /// PageSpeed Insights API key.
    #[arg(long, alias = "apiKey")]
    api_key: Option<String>,

    /// Pause between requests, e.g. "1.5s" or "500ms" (default 1.5s).
    #[arg(long, alias = "delay", value_name = "DURATION")]
    duration: Option<String>,

    /// Write the report to this file instead of stdout.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Report format.
    #[arg(long, value_enum)]
    format: Option<ReportFormat>,

    /// Pause before retrying a failed request (default 1s).
    #[arg(long, value_name = "DURATION")]
    retry_delay: Option<String>,

    /// Per-request timeout (default 120s).
    #[arg(long, value_name = "DURATION")]
    timeout: Option<String>,

    /// Maximum number of requests in flight.
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Override the PageSpeed API base URL.
    #[arg(long)]
    endpoint: Option<String>,

    /// Override the default configuration path.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Suppress all log output.
    #[arg(long, action = ArgAction::SetTrue, alias = "noLogs")]
    no_logs: bool,

    /// Increase logging verbosity.
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

impl Args {
    fn apply_overrides(&self, settings: &mut RunSettings) {
        if let Some(key) = &self.api_key {
            settings.api_key = Some(key.clone());
        }
        if let Some(delay) = &self.duration {
            settings.delay = delay.clone();
        }
        if let Some(format) = self.format {
            settings.format = format;
        }
        if let Some(retry_delay) = &self.retry_delay {
            settings.retry_delay = retry_delay.clone();
        }
        if let Some(timeout) = &self.timeout {
            settings.request_timeout = timeout.clone();
        }
        if let Some(limit) = self.max_in_flight {
            settings.max_in_flight = Some(limit);
        }
        if let Some(endpoint) = &self.endpoint {
            settings.endpoint = endpoint.clone();
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "off"
    } else if verbose {
        "sitespeed=debug"
    } else {
        "sitespeed=info"
    };
    let filter = if quiet {
        EnvFilter::new(default_level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_config_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    match override_path {
        Some(path) => Ok(path),
        None => default_config_path(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.no_logs);

    let config_path = resolve_config_path(args.config.clone())?;
    debug!(path = %config_path.display(), "using config");
    let mut settings = RunSettings::load_or_default(&config_path)?;
    args.apply_overrides(&mut settings);

    let measurements = measure_site_list(&args.sites, &settings).await?;
    let document = render(&measurements, settings.format)?;
    write_report(&document, args.output.as_deref())?;

    info!(sites = measurements.len(), "done");
    Ok(())
}
