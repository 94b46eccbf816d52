use std::{fs, path::Path};

use anyhow::{Context, Result};
use tracing::debug;

/// Separator between records in a site list: a comma directly followed by a newline.
pub const RECORD_SEPARATOR: &str = ",\n";

/// Read a site list from disk.
///
/// Each record must end with `,\n` and may be wrapped in double quotes. A
/// record that lacks the exact terminator (for example `,\r\n`) is merged with
/// its neighbour rather than split.
pub fn load_sites(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Unable to read site list at {}", path.display()))?;
    let sites = parse_sites(&raw);
    debug!(path = %path.display(), count = sites.len(), "loaded site list");
    Ok(sites)
}

/// Split raw site list contents into URLs, preserving input order.
pub fn parse_sites(raw: &str) -> Vec<String> {
    raw.split(RECORD_SEPARATOR)
        .map(|record| record.replace(['"', '\n', '\r'], ""))
        .filter(|site| !site.is_empty())
        .collect()
}
