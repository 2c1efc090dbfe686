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

//! The GELF writer
//! ===============
//!
//! # Introduction
//!
//! [`Writer`] is the sending endpoint: it encodes a [`Message`] to its JSON envelope,
//! compresses it, splits it across datagrams when it outgrows the budget, & hands each datagram
//! to a UDP socket `connect(2)`ed to the collector.
//!
//! # Examples
//!
//! To send a record to a collector on the conventional GELF port:
//!
//! ```rust
//! use gelf_udp::{message::Message, writer::Writer};
//! let writer = Writer::new("127.0.0.1:12201").unwrap();
//! writer
//!     .write_message(&Message {
//!         full: "Hello, world!".to_owned(),
//!         ..Message::default()
//!     })
//!     .unwrap();
//! ```
//!
//! Or, tuned:
//!
//! ```rust
//! use gelf_udp::compress::{CompressionLevel, CompressionType};
//! use gelf_udp::writer::Writer;
//! let writer = Writer::builder()
//!     .compression_type(CompressionType::Zlib)
//!     .compression_level(CompressionLevel::BestSpeed)
//!     .facility("doctest")
//!     .connect("127.0.0.1:12201")
//!     .unwrap();
//! ```
//!
//! # Discussion
//!
//! The writer also implements [`std::io::Write`] so it can be handed to a logging facade as a
//! generic byte sink. That abstraction costs information: a facade delivers finished text with
//! no source position attached, so the `Write` implementation walks the call stack (see
//! [`caller`](crate::caller)) to recover `_file` & `_line` extras, skipping any frames that
//! live under the facade's own directory.
//!
//! Sends are best-effort, exactly as UDP is: no buffering, no retry, no acknowledgement. A
//! send error aborts the remainder of a chunk burst & surfaces to the caller; the receiving
//! side treats the partial burst as ordinary datagram loss.

use crate::{
    caller,
    chunk::{self, DEFAULT_DATAGRAM_SIZE},
    compress::{self, CompressionLevel, CompressionType},
    level::Level,
    message::{self, first_line, now_unix, Message},
};

use backtrace::Backtrace;
use serde_json::{Map, Value};

use std::net::{ToSocketAddrs, UdpSocket};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Writer errors
#[non_exhaustive]
pub enum Error {
    /// Failed to encode a Message to its envelope
    Encode {
        source: message::Error,
        back: Backtrace,
    },
    /// Failed to compress an envelope
    Compress {
        source: compress::Error,
        back: Backtrace,
    },
    /// Failed to split an envelope across datagrams
    Chunk {
        source: chunk::Error,
        back: Backtrace,
    },
    /// I/O error
    Io {
        source: std::io::Error,
        back: Backtrace,
    },
    /// Failed to discover a hostname for this host
    NoHostname {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        back: Backtrace,
    },
}

impl std::convert::From<message::Error> for Error {
    fn from(err: message::Error) -> Self {
        Error::Encode {
            source: err,
            back: Backtrace::new(),
        }
    }
}

impl std::convert::From<compress::Error> for Error {
    fn from(err: compress::Error) -> Self {
        Error::Compress {
            source: err,
            back: Backtrace::new(),
        }
    }
}

impl std::convert::From<chunk::Error> for Error {
    fn from(err: chunk::Error) -> Self {
        Error::Chunk {
            source: err,
            back: Backtrace::new(),
        }
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
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
            Error::Encode { source, .. } => write!(f, "While encoding a message, got {}", source),
            Error::Compress { source, .. } => {
                write!(f, "While compressing an envelope, got {}", source)
            }
            Error::Chunk { source, .. } => {
                write!(f, "While splitting an envelope into chunks, got {}", source)
            }
            Error::Io { source, .. } => write!(f, "I/O error: {}", source),
            Error::NoHostname { source, .. } => write!(
                f,
                "While extracting the name of the current host, got {}",
                source
            ),
            _ => write!(f, "GELF writer error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Encode { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Compress { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Chunk { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Io { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::NoHostname { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            _ => write!(f, "{}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          host defaults                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// `hostname::get()` returns an `Result<OsString,_>`, which is really kind of a hassle to work
/// with; flatten it to a `String` up front (on Unix the raw bytes, lossily decoded; elsewhere
/// whatever the platform will admit to).
#[cfg(unix)]
fn hostname_text(name: std::ffi::OsString) -> String {
    use std::os::unix::ffi::OsStringExt;
    String::from_utf8_lossy(&name.into_vec()).into_owned()
}

#[cfg(not(unix))]
fn hostname_text(name: std::ffi::OsString) -> String {
    name.to_string_lossy().into_owned()
}

/// Attempt to figure-out a hostname for the envelopes' `host` field.
///
/// First simply try [gethostname()]; failing that, use the local IP address in its stead. GELF
/// only asks that the field be non-empty text, so no further validation is applied.
///
/// [gethostname()]: https://man7.org/linux/man-pages/man2/gethostname.2.html
fn default_hostname() -> Result<String> {
    hostname::get()
        .map_err(|err| Error::NoHostname {
            source: Box::new(err),
            back: Backtrace::new(),
        })
        .map(hostname_text)
        .and_then(|name| {
            if name.is_empty() {
                Err(Error::NoHostname {
                    source: "gethostname() produced an empty name".into(),
                    back: Backtrace::new(),
                })
            } else {
                Ok(name)
            }
        })
        .or_else(|_err| {
            local_ip_address::local_ip()
                .map(|ip| ip.to_string())
                .map_err(|err| Error::NoHostname {
                    source: Box::new(err),
                    back: Backtrace::new(),
                })
        })
}

/// The default facility is the current executable's name; if for any reason that value cannot
/// be retrieved, simply "-".
fn default_facility() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|pbuf| {
            pbuf.file_name()
                .map(|os_str| os_str.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| String::from("-"))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          struct Writer                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The sending endpoint of the codec pair.
///
/// All methods take `&self`; the underlying socket send is thread-safe & each message's
/// datagram burst is independent, so a `Writer` may be shared behind an [`Arc`] without
/// additional locking.
///
/// [`Arc`]: std::sync::Arc
pub struct Writer {
    socket: UdpSocket,
    hostname: String,
    facility: String,
    compression_type: CompressionType,
    compression_level: CompressionLevel,
    max_datagram_size: usize,
    facade_paths: Vec<String>,
}

pub struct WriterBuilder {
    hostname: Option<String>,
    facility: Option<String>,
    compression_type: CompressionType,
    compression_level: CompressionLevel,
    max_datagram_size: usize,
    facade_paths: Vec<String>,
}

impl WriterBuilder {
    /// The `host` stamped on outgoing envelopes whose own `host` is empty. An empty string
    /// requests OS discovery, which is also the default.
    pub fn hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
    pub fn facility<S: Into<String>>(mut self, facility: S) -> Self {
        self.facility = Some(facility.into());
        self
    }
    pub fn compression_type(mut self, kind: CompressionType) -> Self {
        self.compression_type = kind;
        self
    }
    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }
    /// Datagram budget in bytes; an envelope larger than this is chunked.
    pub fn max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }
    /// Replace the path fragments used to recognize (and skip) logging-facade stack frames
    /// when the writer is driven through [`std::io::Write`].
    pub fn facade_paths<S: Into<String>, I: IntoIterator<Item = S>>(mut self, paths: I) -> Self {
        self.facade_paths = paths.into_iter().map(Into::into).collect();
        self
    }
    /// Bind a local UDP socket, fix its remote address to `collector` & build the [`Writer`].
    pub fn connect<A: ToSocketAddrs>(self, collector: A) -> Result<Writer> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(collector)?;
        let hostname = match self.hostname {
            Some(name) if !name.is_empty() => name,
            _ => default_hostname()?,
        };
        Ok(Writer {
            socket,
            hostname,
            facility: self.facility.unwrap_or_else(default_facility),
            compression_type: self.compression_type,
            compression_level: self.compression_level,
            max_datagram_size: self.max_datagram_size,
            facade_paths: self.facade_paths,
        })
    }
}

impl Writer {
    /// Construct a [`Writer`] with default configuration, sending to `collector`.
    pub fn new<A: ToSocketAddrs>(collector: A) -> Result<Writer> {
        Writer::builder().connect(collector)
    }

    pub fn builder() -> WriterBuilder {
        WriterBuilder {
            hostname: None,
            facility: None,
            compression_type: CompressionType::default(),
            compression_level: CompressionLevel::default(),
            max_datagram_size: DEFAULT_DATAGRAM_SIZE,
            facade_paths: caller::DEFAULT_FACADE_PATHS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// The `host` this writer stamps on envelopes.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The `facility` this writer stamps on records it constructs itself (the
    /// [`std::io::Write`] path).
    pub fn facility(&self) -> &str {
        &self.facility
    }

    /// Encode, compress, chunk & transmit one message.
    ///
    /// A `msg` with an empty `host` is sent with this writer's hostname substituted. Returns
    /// once every datagram has been handed to the kernel; the first socket error aborts the
    /// burst & is surfaced.
    pub fn write_message(&self, msg: &Message) -> Result<()> {
        let envelope = if msg.host.is_empty() {
            let mut msg = msg.clone();
            msg.host = self.hostname.clone();
            msg.to_envelope()?
        } else {
            msg.to_envelope()?
        };
        let payload = compress::compress(&envelope, self.compression_type, self.compression_level)?;
        for datagram in chunk::split(payload, self.max_datagram_size)? {
            self.socket.send(&datagram)?;
        }
        Ok(())
    }

    /// Build a [`Message`] from one facade-delivered log line.
    fn line_message(&self, buf: &[u8], file: String, line: u32) -> Message {
        let text = String::from_utf8_lossy(buf);
        let full = text.trim_end_matches('\n');
        let mut extra = Map::new();
        extra.insert("_file".to_owned(), Value::from(file));
        extra.insert("_line".to_owned(), Value::from(line));
        Message {
            host: self.hostname.clone(),
            short: first_line(full).to_owned(),
            full: full.to_owned(),
            time_unix: now_unix(),
            level: Level::LOG_INFO,
            facility: self.facility.clone(),
            extra,
            ..Message::default()
        }
    }
}

/// The byte-sink adapter for generic logging facades.
///
/// The input is taken to be one complete log line: the first line becomes `short`, the whole
/// input (trailing newlines stripped) becomes `full`, the clock is read for the timestamp, &
/// the caller's source position -- recovered by walking the stack past the facade's frames --
/// rides along as `_file`/`_line` extras. On success the *entire* input is reported consumed,
/// whatever ended up on the wire.
impl std::io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let (file, line) = caller::get_caller_ignoring(&self.facade_paths, 1);
        let msg = self.line_message(buf, file, line);
        self.write_message(&msg)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::reader::Reader;

    use rand::{distributions::Alphanumeric, Rng};

    use std::io::Write as _;

    fn send_and_recv(msg_data: &str, kind: CompressionType) -> Message {
        let mut reader = Reader::bind("127.0.0.1:0").unwrap();
        let mut writer = Writer::builder()
            .compression_type(kind)
            .connect(reader.local_addr().unwrap())
            .unwrap();
        assert_eq!(writer.write(msg_data.as_bytes()).unwrap(), msg_data.len());
        reader.read_message().unwrap()
    }

    fn send_and_recv_msg(msg: &Message, kind: CompressionType) -> Message {
        let mut reader = Reader::bind("127.0.0.1:0").unwrap();
        let writer = Writer::builder()
            .compression_type(kind)
            .connect(reader.local_addr().unwrap())
            .unwrap();
        writer.write_message(msg).unwrap();
        reader.read_message().unwrap()
    }

    #[test]
    fn test_new_fails_on_bad_address() {
        assert!(Writer::new("").is_err());
    }

    /// Single-datagram messages that are split over multiple lines, for every compression
    /// type.
    #[test]
    fn test_write_small_multi_line() {
        for kind in [
            CompressionType::Gzip,
            CompressionType::Zlib,
            CompressionType::None,
        ] {
            let msg_data = "awesomesauce\nbananas";
            let msg = send_and_recv(msg_data, kind);
            assert_eq!(msg.short, "awesomesauce");
            assert_eq!(msg.full, msg_data);
        }
    }

    /// A payload too entropic to compress below the datagram budget must arrive intact
    /// through chunk reassembly.
    #[test]
    fn test_write_big_chunked() {
        let rand_data: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8192)
            .map(char::from)
            .collect();
        let msg_data = format!("awesomesauce\n{}", rand_data);

        for kind in [CompressionType::Gzip, CompressionType::Zlib] {
            let msg = send_and_recv(&msg_data, kind);
            assert_eq!(msg.short, "awesomesauce");
            assert_eq!(msg.full, msg_data);
        }
    }

    /// Structured & pre-encoded extras round-trip; integer extras come back numerically
    /// equal (JSON numbers only carry double precision).
    #[test]
    fn test_extra_data() {
        let mut extra = Map::new();
        extra.insert(
            "_a".to_owned(),
            Value::from(10 * chrono::Utc::now().timestamp()),
        );
        extra.insert("_file".to_owned(), Value::from("writer.rs"));
        extra.insert("_line".to_owned(), Value::from(186));

        let m = Message {
            version: "1.0".to_owned(),
            host: "fake-host".to_owned(),
            short: "quick".to_owned(),
            full: "quick\nwith more detail".to_owned(),
            time_unix: chrono::Utc::now().timestamp() as f64,
            level: Level::LOG_INFO,
            facility: "writer_test".to_owned(),
            extra: extra.clone(),
            raw_extra: Vec::from(&b"{\"_woo\": \"hoo\"}"[..]),
        };

        for kind in [CompressionType::Gzip, CompressionType::Zlib] {
            let msg = send_and_recv_msg(&m, kind);
            assert_eq!(msg.short, "quick");
            assert_eq!(msg.full, "quick\nwith more detail");
            assert_eq!(msg.host, "fake-host");
            assert_eq!(msg.time_unix, m.time_unix);
            assert_eq!(msg.extra.len(), 4);
            assert_eq!(msg.extra["_a"].as_i64(), extra["_a"].as_i64());
            assert_eq!(msg.extra["_file"], extra["_file"]);
            assert_eq!(msg.extra["_line"].as_i64(), Some(186));
            assert_eq!(msg.extra["_woo"].as_str(), Some("hoo"));
        }
    }

    #[test]
    fn test_unprefixed_extra_is_refused() {
        let reader = Reader::bind("127.0.0.1:0").unwrap();
        let writer = Writer::new(reader.local_addr().unwrap()).unwrap();
        let mut msg = Message::default();
        msg.extra.insert("C".to_owned(), Value::from(9));
        assert!(matches!(
            writer.write_message(&msg),
            Err(Error::Encode {
                source: message::Error::InvalidField { .. },
                ..
            })
        ));
    }

    /// A message that leaves `host` empty goes out stamped with the writer's (OS-discovered)
    /// hostname.
    #[test]
    fn test_empty_host_is_filled_in() {
        let mut reader = Reader::bind("127.0.0.1:0").unwrap();
        let writer = Writer::new(reader.local_addr().unwrap()).unwrap();
        assert!(!writer.hostname().is_empty());
        writer
            .write_message(&Message {
                short: "hello".to_owned(),
                ..Message::default()
            })
            .unwrap();
        let msg = reader.read_message().unwrap();
        assert_eq!(msg.host, writer.hostname());
    }

    /// The `Write` path must attach this call site -- not the adapter's own frame -- as the
    /// `_file`/`_line` extras.
    #[test]
    fn test_write_attaches_caller_extras() {
        let mut reader = Reader::bind("127.0.0.1:0").unwrap();
        let mut writer = Writer::new(reader.local_addr().unwrap()).unwrap();
        writer.write(b"where am I?").unwrap();

        let msg = reader.read_message().unwrap();
        let file = msg.extra["_file"].as_str().unwrap();
        assert!(file.ends_with("writer.rs"), "unexpected file {}", file);
        let line = msg.extra["_line"].as_i64().unwrap();
        assert!(line > 0, "unexpected line {}", line);
    }

    /// The resolver must see through its own machinery: from here, frame zero is this file.
    #[test]
    fn test_get_caller() {
        let (file, _line) = caller::get_caller(0);
        assert!(file.ends_with("writer.rs"), "unexpected file {}", file);

        let (file, _line) = caller::get_caller_ignoring(&[] as &[&str], 0);
        assert!(file.ends_with("writer.rs"), "unexpected file {}", file);
    }
}
