use std::{fs, path::Path};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pagespeed::Measurement;

/// Output document flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFormat {
    /// YAML document stream, one list entry per site.
    #[default]
    Yaml,
    /// Pretty-printed JSON array.
    Json,
}

pub fn render(measurements: &[Measurement], format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Yaml => Ok(render_yaml(measurements)),
        ReportFormat::Json => render_json(measurements),
    }
}

/// `---` followed by one block per measurement, blocks separated by a blank line.
pub fn render_yaml(measurements: &[Measurement]) -> String {
    let mut out = String::from("---\n");
    for measurement in measurements {
        out.push_str(&format!(
            "- date: {}\n  url: {}\n  firstMeaningfulPaint: {:.6}\n  timeToInteractive: {:.6}\n  speedIndex: {:.6}\n  firstContentfulPaint: {:.6}\n\n",
            measurement.date,
            measurement.url,
            measurement.first_meaningful_paint,
            measurement.time_to_interactive,
            measurement.speed_index,
            measurement.first_contentful_paint,
        ));
    }
    out
}

pub fn render_json(measurements: &[Measurement]) -> Result<String> {
    let mut out =
        serde_json::to_string_pretty(measurements).context("Failed to serialise measurements")?;
    out.push('\n');
    Ok(out)
}

/// Write the document to `output`, replacing any existing file, or print it
/// to stdout when no path is given.
pub fn write_report(document: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, document)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{document}"),
    }
    Ok(())
}
