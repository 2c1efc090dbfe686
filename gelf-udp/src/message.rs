// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of gelf-udp.
//
// gelf-udp is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! The GELF message model & its JSON envelope
//! ==========================================
//!
//! # Introduction
//!
//! [`Message`] is the canonical in-memory log record. On the wire it becomes a single JSON
//! object -- the *envelope* -- whose reserved keys are `version`, `host`, `short_message`,
//! `full_message`, `timestamp`, `level` & `facility`. Caller-supplied extras are merged in as
//! *sibling* keys of the reserved ones, never nested; to keep them from colliding with future
//! revisions of the format, every extra key must begin with an underscore, and `_id` is
//! forbidden outright (collectors use it internally).
//!
//! # Discussion
//!
//! Extras are heterogeneous (numbers, strings, sub-objects), so they're modelled as a
//! [`serde_json::Map`] -- [`serde_json::Value`] is exactly the tagged variant type this
//! calls for. Callers that have already serialized their fields can instead (or additionally)
//! supply [`raw_extra`](Message::raw_extra): pre-encoded JSON object bytes that are merged by
//! textual splice at envelope-assembly time, without a parse. When the same key appears in both,
//! the structured `extra` wins: raw members are spliced ahead of the structured ones, and JSON
//! parsers conventionally let the last occurrence of a key win.

use crate::level::Level;

use backtrace::Backtrace;
use serde_json::{Map, Value};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Message codec errors
#[non_exhaustive]
pub enum Error {
    /// An extra key is reserved, or lacks the `_` prefix
    InvalidField { name: String, back: Backtrace },
    /// Pre-encoded extras are not a JSON object, or name a reserved key
    BadRawExtra { back: Backtrace },
    /// The timestamp is not representable in JSON
    BadTimestamp { value: f64, back: Backtrace },
    /// JSON (de)serialization failure
    Encoding {
        source: serde_json::Error,
        back: Backtrace,
    },
    /// The envelope parsed, but not to a JSON object
    NotAnObject { back: Backtrace },
}

impl std::convert::From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding {
            source: err,
            back: Backtrace::new(),
        }
    }
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidField { name, .. } => {
                write!(
                    f,
                    "{:?} is not a legal extra field name (extras must begin with '_', and '_id' is reserved)",
                    name
                )
            }
            Error::BadRawExtra { .. } => write!(
                f,
                "raw extras must be a JSON object naming no reserved keys"
            ),
            Error::BadTimestamp { value, .. } => {
                write!(f, "{} cannot be carried in a JSON number", value)
            }
            Error::Encoding { source, .. } => write!(f, "JSON error: {}", source),
            Error::NotAnObject { .. } => write!(f, "a GELF envelope must be a JSON object"),
            _ => write!(f, "message codec error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidField { name: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::BadRawExtra { back } => write!(f, "{}\n{:#?}", self, back),
            Error::BadTimestamp { value: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Encoding { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::NotAnObject { back } => write!(f, "{}\n{:#?}", self, back),
            _ => write!(f, "{}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         struct Message                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The envelope keys a caller may not shadow with extras.
pub const RESERVED_KEYS: [&str; 8] = [
    "version",
    "host",
    "short_message",
    "full_message",
    "timestamp",
    "level",
    "facility",
    "_id",
];

/// One GELF log record.
///
/// All fields are public; this is a data record, not an abstraction. A [`Writer`] will fill an
/// empty `host` from its own configuration before encoding.
///
/// [`Writer`]: crate::writer::Writer
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// GELF spec version, `"1.0"` or `"1.1"`
    pub version: String,
    /// originating host
    pub host: String,
    /// concise summary; derived from the first line of `full` when left empty
    pub short: String,
    /// the complete message text (may span lines)
    pub full: String,
    /// seconds since the Unix epoch, fractional seconds allowed
    pub time_unix: f64,
    /// syslog severity
    pub level: Level,
    /// subsystem that originated the record
    pub facility: String,
    /// additional fields, merged into the envelope as top-level keys
    pub extra: Map<String, Value>,
    /// pre-encoded JSON object bytes, spliced into the envelope without a parse
    pub raw_extra: Vec<u8>,
}

impl std::default::Default for Message {
    fn default() -> Self {
        Message {
            version: String::from("1.1"),
            host: String::new(),
            short: String::new(),
            full: String::new(),
            time_unix: 0.0,
            level: Level::default(),
            facility: String::new(),
            extra: Map::new(),
            raw_extra: Vec::new(),
        }
    }
}

/// The prefix of `text` up to (exclusive) the first newline.
pub(crate) fn first_line(text: &str) -> &str {
    match text.find('\n') {
        Some(i) => &text[..i],
        None => text,
    }
}

/// The current wall-clock time as float seconds since the Unix epoch.
pub(crate) fn now_unix() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1.0e6
}

impl Message {
    /// Serialize this record to its JSON envelope.
    ///
    /// `version`, `host`, `short_message`, `timestamp` & `level` always appear; `full_message`
    /// & `facility` are omitted when empty. Extras are validated (underscore prefix, `_id`
    /// forbidden) & merged as sibling keys. Non-empty [`raw_extra`](Message::raw_extra) is
    /// given a shallow once-over & spliced in textually.
    pub fn to_envelope(&self) -> Result<Vec<u8>> {
        let mut envelope = Map::new();
        envelope.insert("version".to_owned(), Value::from(self.version.as_str()));
        envelope.insert("host".to_owned(), Value::from(self.host.as_str()));
        let short = if self.short.is_empty() && !self.full.is_empty() {
            first_line(&self.full)
        } else {
            &self.short
        };
        envelope.insert("short_message".to_owned(), Value::from(short));
        if !self.full.is_empty() {
            envelope.insert("full_message".to_owned(), Value::from(self.full.as_str()));
        }
        let timestamp =
            serde_json::Number::from_f64(self.time_unix).ok_or_else(|| Error::BadTimestamp {
                value: self.time_unix,
                back: Backtrace::new(),
            })?;
        envelope.insert("timestamp".to_owned(), Value::Number(timestamp));
        envelope.insert("level".to_owned(), Value::from(self.level as u8));
        if !self.facility.is_empty() {
            envelope.insert("facility".to_owned(), Value::from(self.facility.as_str()));
        }

        for (name, value) in &self.extra {
            if !name.starts_with('_') || name == "_id" {
                return Err(Error::InvalidField {
                    name: name.clone(),
                    back: Backtrace::new(),
                });
            }
            envelope.insert(name.clone(), value.clone());
        }

        let body = serde_json::to_vec(&Value::Object(envelope))?;
        if self.raw_extra.is_empty() {
            return Ok(body);
        }

        // Splice `{raw members}` and `{body members}` into one object, raw members first so
        // that structured members shadow them under last-key-wins parsing.
        let raw = validate_raw_extra(&self.raw_extra)?;
        if raw.is_empty() {
            return Ok(body);
        }
        let mut spliced = Vec::with_capacity(raw.len() + body.len() + 2);
        spliced.push(b'{');
        spliced.extend_from_slice(raw);
        spliced.push(b',');
        spliced.extend_from_slice(&body[1..]);
        Ok(spliced)
    }

    /// Parse a JSON envelope back into a [`Message`].
    ///
    /// Reserved keys map onto their fields; everything else -- underscore-prefixed or not --
    /// is collected into [`extra`](Message::extra) as-is. JSON numbers only carry double
    /// precision, so integer extras come back as the numerically equal double.
    pub fn from_envelope(buf: &[u8]) -> Result<Message> {
        let parsed: Value = serde_json::from_slice(buf)?;
        let map = match parsed {
            Value::Object(map) => map,
            _ => {
                return Err(Error::NotAnObject {
                    back: Backtrace::new(),
                })
            }
        };

        let mut msg = Message {
            version: String::new(),
            ..Message::default()
        };
        for (key, value) in map {
            match key.as_str() {
                "version" => msg.version = text_of(value),
                "host" => msg.host = text_of(value),
                "short_message" => msg.short = text_of(value),
                "full_message" => msg.full = text_of(value),
                "timestamp" => msg.time_unix = value.as_f64().unwrap_or_default(),
                "level" => {
                    msg.level = Level::from_severity(value.as_f64().unwrap_or(6.0) as u8);
                }
                "facility" => msg.facility = text_of(value),
                _ => {
                    msg.extra.insert(key, value);
                }
            }
        }
        Ok(msg)
    }
}

/// Reserved fields should be strings, but the reader is lenient: anything else is carried over
/// in its JSON rendering rather than dropped.
fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Shallow validation of pre-encoded extras: must begin with `{`, end with `}`, and must not
/// (textually) name a reserved key. Returns the member bytes, braces stripped.
///
/// The reserved-key scan matches `"key"` anywhere in the buffer, so a reserved name appearing
/// in a *value* is also refused; that's the cost of staying shallow, and such payloads are
/// better off in [`extra`](Message::extra) anyway.
fn validate_raw_extra(raw: &[u8]) -> Result<&[u8]> {
    let trimmed = trim_ascii(raw);
    if trimmed.len() < 2 || trimmed[0] != b'{' || trimmed[trimmed.len() - 1] != b'}' {
        return Err(Error::BadRawExtra {
            back: Backtrace::new(),
        });
    }
    for key in RESERVED_KEYS {
        let needle = format!("\"{}\"", key);
        if contains(trimmed, needle.as_bytes()) {
            return Err(Error::BadRawExtra {
                back: Backtrace::new(),
            });
        }
    }
    Ok(trim_ascii(&trimmed[1..trimmed.len() - 1]))
}

fn trim_ascii(buf: &[u8]) -> &[u8] {
    let start = buf
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(buf.len());
    let end = buf
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &buf[start..end]
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(envelope: &[u8]) -> Map<String, Value> {
        match serde_json::from_slice(envelope).unwrap() {
            Value::Object(map) => map,
            other => panic!("expected an object, got {}", other),
        }
    }

    #[test]
    fn test_required_keys() {
        let msg = Message {
            host: String::from("bree"),
            time_unix: 1234.5,
            ..Message::default()
        };
        let map = parse(&msg.to_envelope().unwrap());
        for key in ["version", "host", "short_message", "timestamp", "level"] {
            assert!(map.contains_key(key), "missing {}", key);
        }
        // Empty full_message & facility are omitted, not emitted as "".
        assert!(!map.contains_key("full_message"));
        assert!(!map.contains_key("facility"));
        assert_eq!(map["level"], Value::from(6));
        assert_eq!(map["timestamp"].as_f64().unwrap(), 1234.5);
    }

    #[test]
    fn test_short_is_derived_from_full() {
        let msg = Message {
            full: String::from("awesomesauce\nbananas"),
            ..Message::default()
        };
        let map = parse(&msg.to_envelope().unwrap());
        assert_eq!(map["short_message"], Value::from("awesomesauce"));
        assert_eq!(map["full_message"], Value::from("awesomesauce\nbananas"));

        // An explicit short is left alone.
        let msg = Message {
            short: String::from("quick"),
            full: String::from("awesomesauce\nbananas"),
            ..Message::default()
        };
        let map = parse(&msg.to_envelope().unwrap());
        assert_eq!(map["short_message"], Value::from("quick"));
    }

    #[test]
    fn test_extra_key_validation() {
        let mut msg = Message::default();
        msg.extra.insert("C".to_owned(), Value::from(9));
        assert!(matches!(
            msg.to_envelope(),
            Err(Error::InvalidField { .. })
        ));

        let mut msg = Message::default();
        msg.extra.insert("_id".to_owned(), Value::from(7));
        assert!(matches!(
            msg.to_envelope(),
            Err(Error::InvalidField { .. })
        ));

        let mut msg = Message::default();
        msg.extra.insert("_fine".to_owned(), Value::from("ok"));
        assert!(msg.to_envelope().is_ok());
    }

    #[test]
    fn test_raw_extra_splice() {
        let msg = Message {
            raw_extra: Vec::from(&b"{\"_woo\": \"hoo\"}"[..]),
            ..Message::default()
        };
        let map = parse(&msg.to_envelope().unwrap());
        assert_eq!(map["_woo"], Value::from("hoo"));
        assert_eq!(map["version"], Value::from("1.1"));

        // An empty raw object is a no-op.
        let msg = Message {
            raw_extra: Vec::from(&b"{}"[..]),
            ..Message::default()
        };
        assert!(msg.to_envelope().is_ok());
    }

    #[test]
    fn test_structured_extras_shadow_raw() {
        let mut msg = Message::default();
        msg.extra.insert("_a".to_owned(), Value::from(1));
        msg.raw_extra = Vec::from(&b"{\"_a\": 2}"[..]);
        let decoded = Message::from_envelope(&msg.to_envelope().unwrap()).unwrap();
        assert_eq!(decoded.extra["_a"].as_i64(), Some(1));
    }

    #[test]
    fn test_raw_extra_validation() {
        for raw in [
            &b"not json"[..],
            &b"[1, 2, 3]"[..],
            &b"{\"version\": \"2.0\"}"[..],
            &b"{\"_id\": 9}"[..],
        ] {
            let msg = Message {
                raw_extra: Vec::from(raw),
                ..Message::default()
            };
            assert!(
                matches!(msg.to_envelope(), Err(Error::BadRawExtra { .. })),
                "{:?} should have been refused",
                raw
            );
        }
    }

    #[test]
    fn test_decode_field_mapping() {
        let envelope = br#"{
            "version": "1.1",
            "host": "bree",
            "short_message": "quick",
            "full_message": "quick\nwith more detail",
            "timestamp": 1234.25,
            "level": 4,
            "facility": "test",
            "_a": 10,
            "stray": true
        }"#;
        let msg = Message::from_envelope(envelope).unwrap();
        assert_eq!(msg.host, "bree");
        assert_eq!(msg.short, "quick");
        assert_eq!(msg.full, "quick\nwith more detail");
        assert_eq!(msg.time_unix, 1234.25);
        assert_eq!(msg.level, Level::LOG_WARNING);
        assert_eq!(msg.facility, "test");
        // Underscored keys land in extra; so do unreserved stray keys.
        assert_eq!(msg.extra["_a"].as_i64(), Some(10));
        assert_eq!(msg.extra["stray"], Value::from(true));
        assert_eq!(msg.extra.len(), 2);
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(matches!(
            Message::from_envelope(b"[1, 2]"),
            Err(Error::NotAnObject { .. })
        ));
        assert!(matches!(
            Message::from_envelope(b"nonsense"),
            Err(Error::Encoding { .. })
        ));
    }

    #[test]
    fn test_non_finite_timestamp() {
        let msg = Message {
            time_unix: f64::NAN,
            ..Message::default()
        };
        assert!(matches!(
            msg.to_envelope(),
            Err(Error::BadTimestamp { .. })
        ));
    }
}
