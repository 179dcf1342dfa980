//! Helpers for the `postflow` operator binary.

pub mod setup;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Print a value as pretty JSON on stdout.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

/// Parse a schedule time: RFC 3339, or an offset from `now` such as `+90s`,
/// `+15m`, `+2h` or `+1d`.
pub fn parse_when(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    let Some(offset) = input.strip_prefix('+') else {
        return DateTime::parse_from_rfc3339(input)
            .map(|t| t.with_timezone(&Utc))
            .with_context(|| format!("Invalid time '{}': expected RFC 3339 or +<n>[smhd]", input));
    };

    let split = offset
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(offset.len());
    let (amount, unit) = offset.split_at(split);
    let amount: i64 = amount
        .parse()
        .with_context(|| format!("Invalid offset '{}'", input))?;
    let delta = match unit {
        "s" | "" => Duration::seconds(amount),
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        other => return Err(anyhow!("Unknown time unit '{}' in '{}'", other, input)),
    };
    Ok(now + delta)
}
