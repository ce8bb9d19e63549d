//! Duration strings such as `"10s"`, `"2m"` or `"250ms"`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration '{0}'")]
    Invalid(String),
    #[error("unsupported duration unit '{unit}' in '{raw}'")]
    Unit { raw: String, unit: String },
}

/// Parse a duration with an optional unit suffix.
///
/// Supported units are `ms`, `s`, `m` and `h`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }
    let split_at = trimmed
        .find(|character: char| !character.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    let value: u64 = number.parse().map_err(|_| DurationError::Invalid(trimmed.to_string()))?;

    match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(value.saturating_mul(3600))),
        other => Err(DurationError::Unit {
            raw: trimmed.to_string(),
            unit: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_units() {
        assert_eq!(parse_duration("0s"), Ok(Duration::ZERO));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 7 "), Ok(Duration::from_secs(7)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), Err(DurationError::Empty));
        assert!(matches!(parse_duration("s10"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("3d"), Err(DurationError::Unit { .. })));
    }
}
