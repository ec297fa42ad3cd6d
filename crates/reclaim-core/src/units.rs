//! Byte sizes and durations as they appear on the command line and in
//! collaborator output.
//!
//! Two unit conventions coexist on a typical host:
//! - journald and coreutils use single letters (`K`, `M`, `G`) for powers of 1024
//! - docker prints `kB`, `MB`, `GB` as powers of 1000
//!
//! [`ByteSize`] accepts both; the IEC spellings (`KiB`, `MiB`, ...) are binary too.
//! Human-readable output always uses decimal units with one decimal place.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UnitError;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

/// A size in bytes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn b(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn kib(n: u64) -> Self {
        Self(n * KIB)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n * MIB)
    }

    pub const fn gib(n: u64) -> Self {
        Self(n * GIB)
    }

    /// Decimal megabytes (10^6), as docker and the health thresholds count them.
    pub const fn mb(n: u64) -> Self {
        Self(n * 1_000_000)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Render in the form `journalctl --vacuum-size=` expects (base 1024).
    pub fn journald_arg(self) -> String {
        for (factor, suffix) in [(TIB, "T"), (GIB, "G"), (MIB, "M"), (KIB, "K")] {
            if self.0 >= factor && self.0 % factor == 0 {
                return format!("{}{}", self.0 / factor, suffix);
            }
        }
        self.0.to_string()
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_bytes(self.0))
    }
}

impl FromStr for ByteSize {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s)
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    let factor = match unit {
        "" | "B" | "b" => 1,
        "K" | "k" | "KiB" => KIB,
        "M" | "MiB" => MIB,
        "G" | "GiB" => GIB,
        "T" | "TiB" => TIB,
        "P" | "PiB" => TIB * 1024,
        "kB" | "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "TB" => 1_000_000_000_000,
        "PB" => 1_000_000_000_000_000,
        _ => return None,
    };
    Some(factor)
}

/// Parse a size such as `200M`, `1.5G`, `12.5kB` or `4096`.
pub fn parse_size(input: &str) -> Result<ByteSize, UnitError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UnitError::Empty);
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let unit = unit.trim();

    let value: f64 = number
        .parse()
        .map_err(|_| UnitError::InvalidSize(input.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(UnitError::InvalidSize(input.to_string()));
    }

    let factor = unit_multiplier(unit).ok_or_else(|| UnitError::UnknownUnit {
        input: input.to_string(),
        unit: unit.to_string(),
    })?;

    Ok(ByteSize((value * factor as f64).round() as u64))
}

/// Format a byte count with decimal units and one decimal place ("50.0 GB").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

    if bytes < 1_000 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        // 999_950 would print as "1000.0 KB"; promote it to "1.0 MB".
        if value < 1_000.0 && format!("{value:.1}") != "1000.0" {
            break;
        }
        value /= 1_000.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

/// Format a signed delta: positive values are bytes freed.
pub fn format_delta(freed: i64) -> String {
    if freed >= 0 {
        format!("freed {}", format_bytes(freed as u64))
    } else {
        format!("grew {}", format_bytes(freed.unsigned_abs()))
    }
}

/// Parse a duration such as `7d`, `12h` or `30min`.
pub fn parse_duration(input: &str) -> Result<Duration, UnitError> {
    let duration =
        humantime::parse_duration(input.trim()).map_err(|e| UnitError::InvalidDuration {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
    if duration.is_zero() {
        return Err(UnitError::InvalidDuration {
            input: input.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}

/// Render in the form `journalctl --vacuum-time=` expects.
///
/// Sub-second remainders round up; journald cannot express them.
pub fn journald_time_arg(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if duration.subsec_nanos() > 0 || secs == 0 {
        secs += 1;
    }

    if secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs % 60 == 0 {
        format!("{}min", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binary_single_letter() {
        assert_eq!(parse_size("200M").unwrap(), ByteSize::mib(200));
        assert_eq!(parse_size("1G").unwrap(), ByteSize::gib(1));
        assert_eq!(parse_size("1.5K").unwrap(), ByteSize(1536));
        assert_eq!(parse_size(" 512 KiB ").unwrap(), ByteSize::kib(512));
    }

    #[test]
    fn test_parse_docker_decimal() {
        assert_eq!(parse_size("12.5kB").unwrap(), ByteSize(12_500));
        assert_eq!(parse_size("3.2GB").unwrap(), ByteSize(3_200_000_000));
        assert_eq!(parse_size("0B").unwrap(), ByteSize(0));
    }

    #[test]
    fn test_parse_plain_bytes() {
        assert_eq!(parse_size("4096").unwrap(), ByteSize(4096));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_size(""), Err(UnitError::Empty));
        assert!(matches!(parse_size("abc"), Err(UnitError::InvalidSize(_))));
        assert!(matches!(
            parse_size("10XB"),
            Err(UnitError::UnknownUnit { .. })
        ));
        assert!(matches!(parse_size("1.2.3M"), Err(UnitError::InvalidSize(_))));
    }

    #[test]
    fn test_format_bytes_decimal() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(999), "999 B");
        assert_eq!(format_bytes(1_500), "1.5 KB");
        assert_eq!(format_bytes(50_000_000_000), "50.0 GB");
        assert_eq!(format_bytes(200 * 1_000_000), "200.0 MB");
        assert_eq!(format_bytes(999_949), "999.9 KB");
        assert_eq!(format_bytes(999_950), "1.0 MB");
        assert_eq!(format_bytes(999_999_999), "1.0 GB");
    }

    #[test]
    fn test_format_delta_sign() {
        assert_eq!(format_delta(50_000_000_000), "freed 50.0 GB");
        assert_eq!(format_delta(-2_000_000), "grew 2.0 MB");
        assert_eq!(format_delta(0), "freed 0 B");
    }

    #[test]
    fn test_journald_size_arg() {
        assert_eq!(ByteSize::mib(200).journald_arg(), "200M");
        assert_eq!(ByteSize::gib(2).journald_arg(), "2G");
        assert_eq!(ByteSize(1000).journald_arg(), "1000");
    }

    #[test]
    fn test_parse_duration_and_journald_arg() {
        let week = parse_duration("7d").unwrap();
        assert_eq!(week, Duration::from_secs(7 * 86_400));
        assert_eq!(journald_time_arg(week), "7d");
        assert_eq!(journald_time_arg(Duration::from_secs(7_200)), "2h");
        assert_eq!(journald_time_arg(Duration::from_secs(90)), "90s");
        assert_eq!(journald_time_arg(Duration::from_secs(300)), "5min");
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
    }
}
