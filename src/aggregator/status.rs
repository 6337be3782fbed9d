use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use crate::summary::NodeStatus;

/// A node whose last heartbeat is younger than this is up.
pub const LIVENESS_WINDOW_MS: i64 = 5_000;

/// Naive heartbeat layout, interpreted as UTC.
const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Error, Debug)]
#[error("invalid heartbeat timestamp {value:?}: {source}")]
pub struct HeartbeatError {
    pub value: String,
    #[source]
    pub source: chrono::ParseError,
}

/// Parse a heartbeat timestamp into UTC.
///
/// Accepts RFC 3339 with any offset, or a naive timestamp taken to be UTC.
pub fn parse_heartbeat(value: &str) -> Result<DateTime<Utc>, HeartbeatError> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, NAIVE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| HeartbeatError {
            value: value.to_string(),
            source,
        })
}

/// Liveness of a node given its last heartbeat.
pub fn node_status(
    last_seen: Option<&str>,
    now: DateTime<Utc>,
) -> Result<NodeStatus, HeartbeatError> {
    let Some(last_seen) = last_seen else {
        return Ok(NodeStatus::NotMonitored);
    };

    let elapsed = now - parse_heartbeat(last_seen)?;
    if elapsed.num_milliseconds() < LIVENESS_WINDOW_MS {
        Ok(NodeStatus::Up)
    } else {
        Ok(NodeStatus::Down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SecondsFormat};

    fn now() -> DateTime<Utc> {
        parse_heartbeat("2024-03-01T12:00:00.000000+00:00").expect("valid")
    }

    fn ago(secs: i64) -> String {
        (now() - Duration::seconds(secs)).to_rfc3339_opts(SecondsFormat::Micros, false)
    }

    #[test]
    fn test_recent_heartbeat_is_up() {
        assert_eq!(node_status(Some(&ago(3)), now()).expect("ok"), NodeStatus::Up);
    }

    #[test]
    fn test_stale_heartbeat_is_down() {
        assert_eq!(node_status(Some(&ago(10)), now()).expect("ok"), NodeStatus::Down);
        assert_eq!(node_status(Some(&ago(5)), now()).expect("ok"), NodeStatus::Down);
    }

    #[test]
    fn test_absent_heartbeat_not_monitored() {
        assert_eq!(node_status(None, now()).expect("ok"), NodeStatus::NotMonitored);
    }

    #[test]
    fn test_offset_is_normalized() {
        let hb = parse_heartbeat("2024-03-01T14:00:00.000000+02:00").expect("valid");
        assert_eq!(hb, now());
    }

    #[test]
    fn test_naive_timestamp_is_utc() {
        let hb = parse_heartbeat("2024-03-01T11:59:58.5").expect("valid");
        assert_eq!((now() - hb).num_milliseconds(), 1_500);
    }

    #[test]
    fn test_garbage_heartbeat_is_error() {
        let err = node_status(Some("yesterday"), now()).unwrap_err();
        assert_eq!(err.value, "yesterday");
    }
}
