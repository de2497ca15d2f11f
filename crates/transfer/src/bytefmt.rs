//! Human-readable byte sizes.

use std::time::Duration;

use crate::error::TransferError;

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

/// Formats a byte count with a binary suffix, e.g. `1.5KiB`.
pub fn format_bytes(n: u64) -> String {
    format_float(n as f64)
}

/// Formats a transfer rate, e.g. `12.25MiB/s`.
pub fn format_rate(n: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { n as f64 / secs } else { 0.0 };
    format!("{}/s", format_float(rate))
}

fn format_float(n: f64) -> String {
    let (value, suffix) = if n < KIB {
        (n, "B")
    } else if n < MIB {
        (n / KIB, "KiB")
    } else if n < GIB {
        (n / MIB, "MiB")
    } else {
        (n / GIB, "GiB")
    };

    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
    format!("{trimmed}{suffix}")
}

/// Parses a size such as `512`, `1.5k` or `2 MiB`. Units are binary and
/// case-insensitive.
pub fn parse_bytes(s: &str) -> Result<u64, TransferError> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| TransferError::InvalidArgument(format!("invalid size: {s:?}")))?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kib" | "kb" | "k" => KIB,
        "mib" | "mb" | "m" => MIB,
        "gib" | "gb" | "g" => GIB,
        other => {
            return Err(TransferError::InvalidArgument(format!(
                "invalid unit: {other}"
            )));
        }
    };

    Ok((value * multiplier) as u64)
}
