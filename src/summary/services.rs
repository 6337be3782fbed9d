//! Per-service running/not-running tallies.
//!
//! Older writers stored `services_count` as a textual dict literal
//! (`{u'etcd': {u'running': 2, u'not_running': 0}}`) instead of a structured
//! mapping. [`ServicesCountRepr`] accepts both on read; writes are always
//! structured.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Running/not-running tally of one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCounter {
    #[serde(default)]
    pub running: u64,
    #[serde(default)]
    pub not_running: u64,
}

impl ServiceCounter {
    pub fn add(&mut self, other: &ServiceCounter) {
        self.running += other.running;
        self.not_running += other.not_running;
    }
}

/// Service name -> tally.
pub type ServicesCount = BTreeMap<String, ServiceCounter>;

/// `services_count` as found in a persisted summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServicesCountRepr {
    Structured(ServicesCount),
    Legacy(String),
}

impl Default for ServicesCountRepr {
    fn default() -> Self {
        Self::Structured(ServicesCount::new())
    }
}

impl From<ServicesCount> for ServicesCountRepr {
    fn from(count: ServicesCount) -> Self {
        Self::Structured(count)
    }
}

impl ServicesCountRepr {
    /// Structured view, decoding the legacy text form when needed.
    pub fn decode(&self) -> Result<ServicesCount, DecodeError> {
        match self {
            Self::Structured(count) => Ok(count.clone()),
            Self::Legacy(text) => decode_legacy(text),
        }
    }
}

/// Errors from decoding a legacy `services_count` literal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected {found:?} at offset {pos}")]
    UnexpectedChar { pos: usize, found: char },

    #[error("trailing input at offset {0}")]
    TrailingInput(usize),

    #[error("{0} must be a mapping")]
    NotAMapping(String),

    #[error("unknown status {status:?} for service {service:?}")]
    UnknownStatus { service: String, status: String },

    #[error("invalid count {value:?} for {service}.{status}")]
    InvalidCount {
        service: String,
        status: String,
        value: String,
    },
}

/// Literal values the legacy form can contain.
#[derive(Debug, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Dict(Vec<(String, Literal)>),
}

/// Decode a legacy dict literal into a structured count.
pub fn decode_legacy(text: &str) -> Result<ServicesCount, DecodeError> {
    let mut parser = Parser::new(text);
    let literal = parser.value()?;
    parser.skip_ws();
    if parser.pos < text.len() {
        return Err(DecodeError::TrailingInput(parser.pos));
    }

    let Literal::Dict(services) = literal else {
        return Err(DecodeError::NotAMapping("services_count".to_string()));
    };

    let mut out = ServicesCount::new();
    for (service, statuses) in services {
        let Literal::Dict(statuses) = statuses else {
            return Err(DecodeError::NotAMapping(service));
        };

        let counter = out.entry(service.clone()).or_default();
        for (status, raw) in statuses {
            let count = literal_count(&raw).ok_or_else(|| DecodeError::InvalidCount {
                service: service.clone(),
                status: status.clone(),
                value: format!("{raw:?}"),
            })?;
            match status.as_str() {
                "running" => counter.running += count,
                "not_running" => counter.not_running += count,
                _ => {
                    return Err(DecodeError::UnknownStatus {
                        service: service.clone(),
                        status,
                    })
                }
            }
        }
    }

    Ok(out)
}

/// Counts were written either as ints or as quoted ints.
fn literal_count(raw: &Literal) -> Option<u64> {
    match raw {
        Literal::Int(n) => u64::try_from(*n).ok(),
        Literal::Str(s) => s.trim().parse().ok(),
        Literal::Dict(_) => None,
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    fn unexpected(&self) -> DecodeError {
        match self.peek() {
            Some(found) => DecodeError::UnexpectedChar {
                pos: self.pos,
                found,
            },
            None => DecodeError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, want: char) -> Result<(), DecodeError> {
        self.skip_ws();
        if self.peek() == Some(want) {
            self.pos += want.len_utf8();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn value(&mut self) -> Result<Literal, DecodeError> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.dict(),
            Some('\'' | '"' | 'u' | 'b') => self.string().map(Literal::Str),
            Some(c) if c == '-' || c.is_ascii_digit() => self.int(),
            _ => Err(self.unexpected()),
        }
    }

    fn dict(&mut self) -> Result<Literal, DecodeError> {
        self.expect('{')?;
        let mut entries = Vec::new();

        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Literal::Dict(entries));
            }

            let key = self.string()?;
            self.expect(':')?;
            let value = self.value()?;
            entries.push((key, value));

            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {}
                _ => return Err(self.unexpected()),
            }
        }
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        self.skip_ws();
        if matches!(self.peek(), Some('u' | 'b')) {
            self.pos += 1;
        }

        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.unexpected()),
        };
        self.pos += 1;

        let mut out = String::new();
        loop {
            match self.bump().ok_or(DecodeError::UnexpectedEnd)? {
                c if c == quote => return Ok(out),
                '\\' => out.push(self.bump().ok_or(DecodeError::UnexpectedEnd)?),
                c => out.push(c),
            }
        }
    }

    fn int(&mut self) -> Result<Literal, DecodeError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        // Python 2 long suffix.
        let digits = &self.src[start..self.pos];
        if matches!(self.peek(), Some('L' | 'l')) {
            self.pos += 1;
        }

        digits.parse().map(Literal::Int).map_err(|_| DecodeError::UnexpectedChar {
            pos: start,
            found: self.src[start..].chars().next().unwrap_or('-'),
        })
    }
}
