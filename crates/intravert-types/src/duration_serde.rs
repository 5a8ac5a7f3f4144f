//! Serde helpers for human-readable durations (`"250ms"`, `"10s"`, `"5m"`).

use serde::{self, Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Parse `<n>ms`, `<n>s`, `<n>m` or `<n>h`. A bare number is milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let parse = |val: &str| -> Result<u64, String> {
        val.trim()
            .parse()
            .map_err(|e| format!("invalid duration '{}': {}", s, e))
    };
    if let Some(val) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(parse(val)?))
    } else if let Some(val) = s.strip_suffix('s') {
        Ok(Duration::from_secs(parse(val)?))
    } else if let Some(val) = s.strip_suffix('m') {
        scaled_secs(parse(val)?, 60, s)
    } else if let Some(val) = s.strip_suffix('h') {
        scaled_secs(parse(val)?, 3600, s)
    } else {
        Ok(Duration::from_millis(parse(s)?))
    }
}

fn scaled_secs(value: u64, factor: u64, source: &str) -> Result<Duration, String> {
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is out of range", source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1500").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("ms").is_err());
    }

    #[test]
    fn oversized_minutes_and_hours_are_errors() {
        let err = parse_duration("307445734561825861m").unwrap_err();
        assert!(err.contains("out of range"), "{err}");
        assert!(parse_duration("5124095576030432h").is_err());
        assert_eq!(
            parse_duration("307445734561825860m").unwrap(),
            Duration::from_secs(307445734561825860 * 60)
        );
    }
}
