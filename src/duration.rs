use std::time::Duration;

use anyhow::{Result, bail};

const NANOS_PER_MICRO: f64 = 1_000.0;
const NANOS_PER_MILLI: f64 = 1_000_000.0;
const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Parse a duration string such as `"300ms"`, `"1.5s"` or `"2h45m"`.
///
/// The input is a sequence of decimal numbers, each with an optional fraction
/// and a mandatory unit suffix. Valid units are `ns`, `us` (or `µs`), `ms`,
/// `s`, `m` and `h`. A bare `"0"` is accepted; negative values are not.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let raw = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if raw.is_empty() {
        bail!("invalid duration {input:?}: empty value");
    }
    if raw.starts_with('-') {
        bail!("invalid duration {input:?}: negative durations are not allowed");
    }
    if raw == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0.0_f64;
    let mut rest = raw;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_len];
        if number.is_empty() || !number.chars().any(|c| c.is_ascii_digit()) {
            bail!("invalid duration {input:?}: expected a number");
        }
        let value: f64 = number
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid duration {input:?}: bad number {number:?}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SECOND,
            "m" => 60.0 * NANOS_PER_SECOND,
            "h" => 3_600.0 * NANOS_PER_SECOND,
            "" => bail!("invalid duration {input:?}: missing unit"),
            other => bail!("invalid duration {input:?}: unknown unit {other:?}"),
        };
        rest = &rest[unit_len..];

        total_nanos += value * scale;
        if total_nanos > u64::MAX as f64 {
            bail!("invalid duration {input:?}: value out of range");
        }
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
