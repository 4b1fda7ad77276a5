//! Custom serde module for duration strings like "500ms", "15m" or "1h30m".

use serde::{self, Deserialize, Deserializer};
use std::time::Duration;

/// Deserializes an optional duration string. A missing value becomes `Duration::ZERO`,
/// which the components read as "use the default".
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        None => Ok(Duration::ZERO),
    }
}

/// Parses one or more `<number><unit>` segments and sums them.
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let mut rest = s.trim();
    if rest.is_empty() {
        return Ok(Duration::ZERO);
    }

    let mut total = 0.0_f64;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(format!("invalid duration: {}", s));
        }
        let (num_str, tail) = rest.split_at(num_end);
        let num: f64 = num_str
            .parse()
            .map_err(|_| format!("invalid duration number: {}", num_str))?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        let seconds = match unit.trim() {
            "ms" => 1e-3,
            "s" | "" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "d" => 86400.0,
            other => return Err(format!("unknown duration unit: {}", other)),
        };

        total += num * seconds;
        rest = next;
    }

    Duration::try_from_secs_f64(total).map_err(|_| format!("duration out of range: {}", s))
}

/// Returns `value` unless it is zero.
pub(crate) fn or_default(value: Duration, default: Duration) -> Duration {
    if value.is_zero() { default } else { value }
}
