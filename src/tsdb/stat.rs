//! Parser for the "latest value" stat replies of the time-series store.
//!
//! A reply carries one segment per matched series of the literal shape
//! `Current:<value> ... Max`. The value sits between the `Current:` marker
//! and the next `Max` on the same line; it must be at least one character.

use thiserror::Error;

const CURRENT: &str = "Current:";
const MAX: &str = "Max";

/// Errors returned when a stat reply cannot yield a usable value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatError {
    #[error("stats not yet available")]
    Empty,

    #[error("current value not found in stat reply")]
    PatternNotFound,

    #[error("current value {0:?} is not numeric")]
    NotNumeric(String),

    #[error("current value is NaN")]
    NotANumber,
}

/// Iterator over the raw `Current:` value segments of a reply.
pub struct CurrentValues<'a> {
    rest: &'a str,
}

impl<'a> CurrentValues<'a> {
    pub fn new(reply: &'a str) -> Self {
        Self { rest: reply }
    }
}

impl<'a> Iterator for CurrentValues<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            let start = self.rest.find(CURRENT)?;
            let after = &self.rest[start + CURRENT.len()..];
            let line = &after[..after.find('\n').unwrap_or(after.len())];

            // The value needs at least one character before the terminator.
            let first_len = line.chars().next().map_or(0, char::len_utf8);
            if first_len > 0 {
                if let Some(idx) = line[first_len..].find(MAX) {
                    let end = first_len + idx;
                    self.rest = &after[end + MAX.len()..];
                    return Some(&line[..end]);
                }
            }

            // Unterminated marker: resume scanning just past it.
            self.rest = &self.rest[start + 1..];
        }
    }
}

fn is_empty_reply(reply: &str) -> bool {
    let trimmed = reply.trim();
    trimmed.is_empty() || trimmed == "[]"
}

fn parse_value(raw: &str) -> Result<f64, StatError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| StatError::NotNumeric(raw.trim().to_string()))
}

/// Extract the first current value of a reply.
///
/// Fails with [`StatError::Empty`] for an empty or `[]` reply, with
/// [`StatError::PatternNotFound`] when no segment exists and with
/// [`StatError::NotANumber`] for a NaN value.
pub fn parse_latest_stat(reply: &str) -> Result<f64, StatError> {
    if is_empty_reply(reply) {
        return Err(StatError::Empty);
    }

    let raw = CurrentValues::new(reply)
        .next()
        .ok_or(StatError::PatternNotFound)?;

    let value = parse_value(raw)?;
    if value.is_nan() {
        return Err(StatError::NotANumber);
    }

    Ok(value)
}

/// Extract every current value of a (wildcard) reply, in reply order.
///
/// NaN values are kept; callers decide whether to skip them. A non-empty
/// reply without any segment yields an empty list.
pub fn parse_latest_stats(reply: &str) -> Result<Vec<f64>, StatError> {
    if is_empty_reply(reply) {
        return Err(StatError::Empty);
    }

    CurrentValues::new(reply).map(parse_value).collect()
}
