//! Human-friendly durations for configuration values
//!
//! Accepts compact forms such as `30s`, `1m`, `2h`, `1d`, `1w` and
//! combinations like `1h30m`. A bare number is read as seconds.

use std::time::Duration;

/// Parse a duration string like "30s", "1m", "1h30m" into a [`Duration`]
///
/// Returns `None` for malformed input. Zero is allowed; callers that need a
/// positive value check for it themselves.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim().to_lowercase();
    if input.is_empty() {
        return None;
    }

    if let Ok(seconds) = input.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let mut total: u64 = 0;
    let mut current_number = String::new();

    for c in input.chars() {
        if c.is_ascii_digit() {
            current_number.push(c);
            continue;
        }
        if current_number.is_empty() {
            return None;
        }

        let value: u64 = current_number.parse().ok()?;
        current_number.clear();

        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 60 * 60 * 24,
            'w' => 60 * 60 * 24 * 7,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(unit)?)?;
    }

    // Trailing digits without a unit ("1m30")
    if !current_number.is_empty() {
        return None;
    }

    Some(Duration::from_secs(total))
}

/// Format a duration in the same compact form `parse_duration` accepts,
/// e.g. "1h 30m". Sub-second precision is dropped.
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(u64, char); 4] = [(86_400, 'd'), (3_600, 'h'), (60, 'm'), (1, 's')];

    let mut remaining = duration.as_secs();
    if remaining == 0 {
        return "0s".to_string();
    }

    let mut parts = Vec::new();
    for (size, unit) in UNITS {
        let count = remaining / size;
        if count > 0 {
            parts.push(format!("{count}{unit}"));
            remaining %= size;
        }
    }
    parts.join(" ")
}
