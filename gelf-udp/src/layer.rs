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

//! [gelf-udp](crate) [`Layer`] implementation.
//!
//! [`Layer`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/trait.Layer.html
//!
//! A [`tracing-subscriber`]-compliant [`Layer`] that forwards [`tracing`] [`Event`]s to a GELF
//! collector through a [`Writer`]. The event's "message" field becomes the record's text, the
//! event's level maps onto the syslog range, & the callsite's source position rides along as
//! `_file`/`_line` extras (no stack walking needed on this path -- `tracing` callsites know
//! where they are).
//!
//! [`tracing-subscriber`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/index.html
//! [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html
//! [`Event`]: https://docs.rs/tracing/0.1.35/tracing/struct.Event.html

use crate::{
    level::Level,
    message::{now_unix, Message},
    writer::{self, Writer},
};

use backtrace::Backtrace;
use serde_json::{Map, Value};
use tracing::Event;
use tracing_subscriber::layer::Context;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// module error type
#[non_exhaustive]
pub enum Error {
    /// An Event had no message field
    NoMessageField {
        name: &'static str,
        back: Backtrace,
    },
    /// Writer error
    Transport {
        source: writer::Error,
        back: Backtrace,
    },
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NoMessageField { name, .. } => write!(
                f,
                "Event '{}' had no message field, and so was not forwarded to the collector",
                name
            ),
            Error::Transport { source, .. } => {
                write!(f, "While sending a GELF message, got {}", source)
            }
            _ => write!(f, "GELF layer error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NoMessageField { name: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Transport { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            _ => write!(f, "{}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          struct Layer                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A [`tracing-subscriber`]-compliant [`Layer`] implementation that will send [`Event`]s to a
/// GELF collector.
///
/// [`tracing-subscriber`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/index.html
/// [`Layer`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/trait.Layer.html
/// [`Event`]: https://docs.rs/tracing/0.1.35/tracing/struct.Event.html
///
/// # Examples
///
/// ```no_run
/// use gelf_udp::layer::Layer;
/// use tracing::info;
/// use tracing_subscriber::layer::SubscriberExt; // Needed to get `with()`
/// use tracing_subscriber::registry::Registry;
///
/// // The default configuration compresses with gzip & sends via UDP to port 12201 on
/// // localhost.
/// let subscriber = Registry::default().with(Layer::try_default().unwrap());
/// let _guard = tracing::subscriber::set_default(subscriber);
///
/// info!("Hello, world!");
/// ```
pub struct Layer {
    writer: Writer,
}

impl Layer {
    /// Wrap a configured [`Writer`] in a [`Layer`].
    pub fn new(writer: Writer) -> Layer {
        Layer { writer }
    }

    /// Attempt to construct a [`Layer`] that will send GELF messages via UDP to the
    /// conventional collector port 12201 on localhost.
    pub fn try_default() -> Result<Layer> {
        Ok(Layer {
            writer: Writer::new("localhost:12201").map_err(|err| Error::Transport {
                source: err,
                back: Backtrace::new(),
            })?,
        })
    }
}

struct MessageEventVisitor {
    message: Option<String>,
}

impl tracing::field::Visit for MessageEventVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            // Regrettably, we have only a `Debug` implementation available to us; but the
            // tracing macros `info!()`, `event!()` & the like all take care to "pre-format" the
            // `message` field so that `value` actually refers to a `std::fmt::Arguments`
            // instance, which will print to a debug format without enclosing double-quotes.
            self.message = Some(format!("{:?}", value));
        }
    }
}

fn syslog_level(level: &tracing::Level) -> Level {
    if *level == tracing::Level::ERROR {
        Level::LOG_ERR
    } else if *level == tracing::Level::WARN {
        Level::LOG_WARNING
    } else if *level == tracing::Level::INFO {
        Level::LOG_INFO
    } else {
        // DEBUG & TRACE both land on the bottom of syslog's eight rungs.
        Level::LOG_DEBUG
    }
}

impl<S> tracing_subscriber::layer::Layer<S> for Layer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageEventVisitor { message: None };
        event.record(&mut visitor);

        let metadata = event.metadata();
        visitor
            .message
            .ok_or_else(|| Error::NoMessageField {
                name: metadata.name(),
                back: Backtrace::new(),
            }) // 👈 :=> StdResult<String, Error>
            .and_then(|text| {
                let mut extra = Map::new();
                if let Some(file) = metadata.file() {
                    extra.insert("_file".to_owned(), Value::from(file));
                }
                if let Some(line) = metadata.line() {
                    extra.insert("_line".to_owned(), Value::from(line));
                }
                self.writer
                    .write_message(&Message {
                        // `short` is left for the encoder to derive from the first line.
                        full: text,
                        time_unix: now_unix(),
                        level: syslog_level(metadata.level()),
                        facility: self.writer.facility().to_owned(),
                        extra,
                        ..Message::default()
                    })
                    .map_err(|err| Error::Transport {
                        source: err,
                        back: Backtrace::new(),
                    })
            })
            .unwrap_or_else(|_err| {
                // The dispatcher's re-entrancy guard keeps this from looping back into us.
                ::tracing::error!("gelf-udp layer failed to forward an event");
            })
    }
}

#[cfg(test)]
mod smoke {

    use super::*;
    use crate::reader::Reader;

    use tracing_subscriber::{layer::SubscriberExt, registry::Registry};

    #[test]
    fn test_layer_forwards_events() {
        let mut reader = Reader::bind("127.0.0.1:0").unwrap();
        let writer = Writer::builder()
            .facility("smoke-test")
            .connect(reader.local_addr().unwrap())
            .unwrap();
        let subscriber = Registry::default().with(Layer::new(writer));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Hello, 世界!");
        });

        let msg = reader.read_message().unwrap();
        assert_eq!(msg.short, "Hello, 世界!");
        assert_eq!(msg.full, "Hello, 世界!");
        assert_eq!(msg.level, Level::LOG_INFO);
        assert_eq!(msg.facility, "smoke-test");
        assert!(msg.extra.contains_key("_file"));
        assert!(msg.extra.contains_key("_line"));
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(syslog_level(&tracing::Level::ERROR), Level::LOG_ERR);
        assert_eq!(syslog_level(&tracing::Level::WARN), Level::LOG_WARNING);
        assert_eq!(syslog_level(&tracing::Level::INFO), Level::LOG_INFO);
        assert_eq!(syslog_level(&tracing::Level::DEBUG), Level::LOG_DEBUG);
        assert_eq!(syslog_level(&tracing::Level::TRACE), Level::LOG_DEBUG);
    }
}
