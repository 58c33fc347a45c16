//! Utility helpers shared by the API client and the collector.
//!
//! This module contains:
//! - ISO-8601 timestamp parsing
//! - Upstream URL construction
//!
//! IMPORTANT:
//! - No metric or registry logic should live here.
//! - This module must remain lightweight and deterministic.
//!

use chrono::{DateTime, NaiveDateTime, ParseError};
use reqwest::Url;

/// Naive layouts accepted when the upstream omits a UTC offset.
///
/// Such values are interpreted as UTC.
const NAIVE_LAYOUTS: [&str; 2] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Parse an ISO-8601 timestamp into Unix epoch seconds.
///
/// Accepted forms:
/// - "2024-05-01T10:00:00Z"
/// - "2024-05-01T10:00:00.250+09:00"
/// - "2024-05-01T10:00:00"          (naive, treated as UTC)
/// - "2024-05-01 10:00:00.5"        (naive, treated as UTC)
///
/// Sub-second precision is kept down to microseconds.
///
/// Callers decide what an empty value means; an empty string is
/// simply a parse error here.
pub fn parse_timestamp(raw: &str) -> Result<f64, ParseError> {
    let raw = raw.trim();

    let err = match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => return Ok(dt.timestamp_micros() as f64 / 1_000_000.0),
        Err(e) => e,
    };

    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Ok(naive.and_utc().timestamp_micros() as f64 / 1_000_000.0);
        }
    }

    Err(err)
}

/// Build an upstream URL from a base endpoint and raw path segments.
///
/// Each segment is percent-encoded individually, so vhost or stream
/// names containing `/` or spaces cannot alter the route.
///
/// Examples:
/// - ("http://ome:8081", ["v1", "vhosts"]) -> "http://ome:8081/v1/vhosts"
/// - ("http://ome:8081/", ["v1", "a b"])   -> "http://ome:8081/v1/a%20b"
///
pub fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_zulu_and_offset_timestamps() {
        assert_eq!(parse_timestamp("1970-01-01T00:01:40Z").unwrap(), 100.0);
        assert_eq!(parse_timestamp("1970-01-01T09:01:40+09:00").unwrap(), 100.0);
        assert_eq!(parse_timestamp("1970-01-01T00:00:01.250Z").unwrap(), 1.25);
    }

    #[test]
    fn naive_timestamps_are_utc() {
        assert_eq!(parse_timestamp("1970-01-01T00:00:10").unwrap(), 10.0);
        assert_eq!(parse_timestamp("1970-01-01 00:00:10.5").unwrap(), 10.5);
    }

    #[test]
    fn rejects_garbage_and_empty() {
        assert!(parse_timestamp("").is_err());
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("2024-13-40T99:00:00Z").is_err());
    }

    #[test]
    fn endpoint_joins_and_encodes_segments() {
        let base = Url::parse("http://ome:8081").unwrap();
        assert_eq!(
            endpoint(&base, &["v1", "vhosts"]).as_str(),
            "http://ome:8081/v1/vhosts"
        );

        let base = Url::parse("http://ome:8081/api/").unwrap();
        assert_eq!(
            endpoint(&base, &["v1", "vhosts", "my host", "a/b"]).as_str(),
            "http://ome:8081/api/v1/vhosts/my%20host/a%2Fb"
        );
    }
}
