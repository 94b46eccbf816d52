use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::batch::BatchPlan;
use crate::duration::parse_duration;
use crate::pagespeed::DEFAULT_ENDPOINT;
use crate::report::ReportFormat;

/// Persisted defaults for a measurement run. Command-line flags take precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Base URL of the PageSpeed API.
    #[serde(default = "RunSettings::default_endpoint")]
    pub endpoint: String,
    /// API key; may also be given with `--api-key`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Pause between launching consecutive requests.
    #[serde(default = "RunSettings::default_delay")]
    pub delay: String,
    /// Pause before the single retry of a failed request. The Go tool waited 1ns.
    #[serde(default = "RunSettings::default_retry_delay")]
    pub retry_delay: String,
    /// Per-request timeout.
    #[serde(default = "RunSettings::default_request_timeout")]
    pub request_timeout: String,
    /// Cap on concurrent requests; unset means one task per site.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default)]
    pub format: ReportFormat,
    #[serde(default = "RunSettings::default_user_agent")]
    pub user_agent: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            api_key: None,
            delay: Self::default_delay(),
            retry_delay: Self::default_retry_delay(),
            request_timeout: Self::default_request_timeout(),
            max_in_flight: None,
            format: ReportFormat::default(),
            user_agent: Self::default_user_agent(),
        }
    }
}

impl RunSettings {
    fn default_endpoint() -> String {
        DEFAULT_ENDPOINT.to_string()
    }

    fn default_delay() -> String {
        "1.5s".to_string()
    }

    fn default_retry_delay() -> String {
        "1s".to_string()
    }

    fn default_request_timeout() -> String {
        "120s".to_string()
    }

    fn default_user_agent() -> String {
        concat!("sitespeed/", env!("CARGO_PKG_VERSION")).to_string()
    }

    /// Load settings from disk, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Unable to read config at {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Malformed config at {}", path.display()))
    }

    pub fn retry_delay(&self) -> Result<Duration> {
        parse_duration(&self.retry_delay).context("Invalid retry delay")
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration(&self.request_timeout).context("Invalid request timeout")
    }

    /// Resolve the launch schedule for a batch.
    pub fn batch_plan(&self) -> Result<BatchPlan> {
        Ok(BatchPlan {
            delay: parse_duration(&self.delay).context("Invalid delay between requests")?,
            max_in_flight: self.max_in_flight,
        })
    }
}

/// Compute the default path to the configuration file.
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("dev", "sitespeed", "sitespeed")
        .context("Unable to resolve platform config directory")?;
    Ok(dirs.config_dir().join("config.json"))
}
