use std::{collections::HashMap, fmt, future::Future, time::Duration};

use anyhow::{Context, Result};
use chrono::Local;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

/// Default PageSpeed Insights v5 endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/pagespeedonline/v5/runPagespeed";

/// Suffix the API appends to second-based display values ("2.1\u{a0}s").
const DISPLAY_SUFFIX: &str = "\u{a0}s";

/// Timing audits extracted from every Lighthouse result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    FirstMeaningfulPaint,
    TimeToInteractive,
    SpeedIndex,
    FirstContentfulPaint,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::FirstMeaningfulPaint,
        Metric::TimeToInteractive,
        Metric::SpeedIndex,
        Metric::FirstContentfulPaint,
    ];

    /// Lighthouse audit identifier.
    pub fn audit_id(&self) -> &'static str {
        match self {
            Metric::FirstMeaningfulPaint => "first-meaningful-paint",
            Metric::TimeToInteractive => "interactive",
            Metric::SpeedIndex => "speed-index",
            Metric::FirstContentfulPaint => "first-contentful-paint",
        }
    }

    /// Field name used in reports.
    pub fn field_name(&self) -> &'static str {
        match self {
            Metric::FirstMeaningfulPaint => "firstMeaningfulPaint",
            Metric::TimeToInteractive => "timeToInteractive",
            Metric::SpeedIndex => "speedIndex",
            Metric::FirstContentfulPaint => "firstContentfulPaint",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// One measured site. Metric values are seconds, or `0.0` when the API did
/// not provide a usable display value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub date: String,
    pub url: String,
    pub first_meaningful_paint: f64,
    pub time_to_interactive: f64,
    pub speed_index: f64,
    pub first_contentful_paint: f64,
}

impl Measurement {
    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::FirstMeaningfulPaint => self.first_meaningful_paint,
            Metric::TimeToInteractive => self.time_to_interactive,
            Metric::SpeedIndex => self.speed_index,
            Metric::FirstContentfulPaint => self.first_contentful_paint,
        }
    }

    fn set_metric(&mut self, metric: Metric, value: f64) {
        match metric {
            Metric::FirstMeaningfulPaint => self.first_meaningful_paint = value,
            Metric::TimeToInteractive => self.time_to_interactive = value,
            Metric::SpeedIndex => self.speed_index = value,
            Metric::FirstContentfulPaint => self.first_contentful_paint = value,
        }
    }
}

/// The slice of a PageSpeed response this tool reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSpeedResponse {
    #[serde(default)]
    pub lighthouse_result: LighthouseResult,
}

#[derive(Debug, Default, Deserialize)]
pub struct LighthouseResult {
    #[serde(default)]
    pub audits: HashMap<String, Audit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    #[serde(default)]
    pub display_value: Option<String>,
}

impl PageSpeedResponse {
    pub fn display_value(&self, metric: Metric) -> Option<&str> {
        self.lighthouse_result
            .audits
            .get(metric.audit_id())
            .and_then(|audit| audit.display_value.as_deref())
    }
}

/// Convert a display value such as `"2.1\u{a0}s"` into seconds.
pub fn parse_display_value(raw: &str) -> Option<f64> {
    raw.replace(DISPLAY_SUFFIX, "").parse().ok()
}

/// Local calendar date in `year-month-day` form, without zero padding.
pub fn today() -> String {
    Local::now().format("%Y-%-m-%-d").to_string()
}

/// Build a measurement from a raw response body.
///
/// Never fails: an undecodable body or an unparsable display value leaves the
/// affected metrics at `0.0` and logs a warning.
pub fn extract_measurement(site: &str, body: &str, date: String) -> Measurement {
    let response = match serde_json::from_str::<PageSpeedResponse>(body) {
        Ok(response) => response,
        Err(err) => {
            warn!(url = %site, error = %err, "undecodable PageSpeed response");
            PageSpeedResponse::default()
        }
    };

    let mut measurement = Measurement {
        date,
        url: site.to_string(),
        first_meaningful_paint: 0.0,
        time_to_interactive: 0.0,
        speed_index: 0.0,
        first_contentful_paint: 0.0,
    };

    for metric in Metric::ALL {
        let raw = response.display_value(metric).unwrap_or_default();
        match parse_display_value(raw) {
            Some(value) => measurement.set_metric(metric, value),
            None => warn!(
                url = %site,
                metric = %metric,
                display_value = raw,
                "unable to parse metric; assigned 0"
            ),
        }
    }

    measurement
}

/// Transport used to reach the scoring API.
pub trait SpeedSource: Send + Sync + 'static {
    /// Issue a GET for `url` and return the response body.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String>> + Send;
}

/// [`SpeedSource`] backed by an async reqwest client.
#[derive(Debug, Clone)]
pub struct HttpSpeedSource {
    client: Client,
}

impl HttpSpeedSource {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl SpeedSource for HttpSpeedSource {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("PageSpeed request failed")?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "PageSpeed API returned non-success status");
        }
        response
            .text()
            .await
            .context("Failed to read PageSpeed response body")
    }
}

/// Base address of the scoring API.
#[derive(Debug, Clone)]
pub struct PageSpeedEndpoint {
    base: Url,
}

impl PageSpeedEndpoint {
    pub fn parse(base: &str) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("Invalid API endpoint {base}"))?;
        Ok(Self { base })
    }

    /// `<base>?key=<api_key>&url=<site>`, query-encoded.
    pub fn request_url(&self, api_key: &str, site: &str) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("key", api_key)
            .append_pair("url", site);
        url.into()
    }
}

/// Measures single sites against the scoring API.
pub struct SpeedFetcher<S> {
    source: S,
    endpoint: PageSpeedEndpoint,
    api_key: String,
    retry_delay: Duration,
}

impl<S: SpeedSource> SpeedFetcher<S> {
    pub fn new(
        source: S,
        endpoint: PageSpeedEndpoint,
        api_key: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            source,
            endpoint,
            api_key: api_key.into(),
            retry_delay,
        }
    }

    /// Fetch and extract one measurement.
    ///
    /// A failed request is retried exactly once after the retry delay; a
    /// second failure is returned to the caller.
    pub async fn measure(&self, site: &str) -> Result<Measurement> {
        let request_url = self.endpoint.request_url(&self.api_key, site);
        info!(url = %site, "measuring loading speed");

        let body = match self.source.fetch(&request_url).await {
            Ok(body) => body,
            Err(err) => {
                warn!(url = %site, error = %err, "request failed, retrying");
                tokio::time::sleep(self.retry_delay).await;
                self.source
                    .fetch(&request_url)
                    .await
                    .with_context(|| format!("Unable to measure {site} after retry"))?
            }
        };
        debug!(url = %site, bytes = body.len(), "received PageSpeed response");

        let measurement = extract_measurement(site, &body, today());
        info!(url = %site, "measured loading speed");
        Ok(measurement)
    }
}
