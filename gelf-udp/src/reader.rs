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

//! The GELF reader
//! ===============
//!
//! # Introduction
//!
//! [`Reader`] is the receiving endpoint: it binds a UDP socket, receives datagrams, routes
//! chunked ones through the [`Reassembler`], decompresses & decodes whatever completes, and
//! yields [`Message`]s to the caller.
//!
//! # Discussion
//!
//! Per-datagram trouble -- an unrecognized payload format, a malformed chunk header, a
//! truncated compression stream -- is logged through `tracing` & skipped, in keeping with UDP's
//! best-effort contract; only socket failures are surfaced, & those are terminal for the
//! reader. [`read_message`](Reader::read_message) otherwise blocks indefinitely; to take a
//! reader down from another thread, obtain a [`Shutdown`] handle & [`close`](Shutdown::close)
//! it, which makes any in-progress receive fail with [`Error::Closed`].

use crate::{
    chunk::CHUNK_MAGIC,
    compress,
    message::Message,
    reassembly::{Reassembler, DEFAULT_MAX_IN_FLIGHT, DEFAULT_REASSEMBLY_TIMEOUT},
};

use backtrace::Backtrace;
use bytes::Bytes;
use tracing::warn;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Reader errors
#[non_exhaustive]
pub enum Error {
    /// I/O error
    Io {
        source: std::io::Error,
        back: Backtrace,
    },
    /// The socket was closed out from under a receive
    Closed { back: Backtrace },
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
            Error::Io { source, .. } => write!(f, "I/O error: {}", source),
            Error::Closed { .. } => write!(f, "the socket was closed while receiving"),
            _ => write!(f, "GELF reader error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Closed { back } => write!(f, "{}\n{:#?}", self, back),
            _ => write!(f, "{}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          struct Reader                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The receiving endpoint of the codec pair.
///
/// Owns the socket & the reassembly table; [`read_message`](Reader::read_message) therefore
/// takes `&mut self` & the reader belongs to one thread. Deployments wanting several receiver
/// threads on one port should bind one `Reader` apiece (with `SO_REUSEPORT` arranged outside
/// this crate) rather than share one table.
pub struct Reader {
    socket: UdpSocket,
    closed: Arc<AtomicBool>,
    reassembler: Reassembler,
    buf: Vec<u8>,
}

pub struct ReaderBuilder {
    reassembly_timeout: Duration,
    max_in_flight: usize,
}

impl ReaderBuilder {
    /// How long an incomplete chunked message may wait for its stragglers.
    pub fn reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout = timeout;
        self
    }
    /// How many incomplete chunked messages may be buffered at once.
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
    /// Bind the UDP socket at `addr` (port 0 permitted -- the OS assigns one) & build the
    /// [`Reader`].
    pub fn bind<A: ToSocketAddrs>(self, addr: A) -> Result<Reader> {
        Ok(Reader {
            socket: UdpSocket::bind(addr)?,
            closed: Arc::new(AtomicBool::new(false)),
            reassembler: Reassembler::new(self.reassembly_timeout, self.max_in_flight),
            buf: vec![0u8; 0xffff],
        })
    }
}

impl Reader {
    /// Bind a [`Reader`] with default configuration at `addr`.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Reader> {
        Reader::builder().bind(addr)
    }

    pub fn builder() -> ReaderBuilder {
        ReaderBuilder {
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// The socket address this reader is bound to (needed by peers that were handed port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Obtain a handle with which another thread can take this reader down.
    pub fn shutdown_handle(&self) -> Result<Shutdown> {
        Ok(Shutdown {
            target: nudge_target(self.socket.local_addr()?),
            closed: Arc::clone(&self.closed),
        })
    }

    /// Block until a complete message arrives & decodes, then return it.
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            let n = self.socket.recv(&mut self.buf)?;
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::Closed {
                    back: Backtrace::new(),
                });
            }
            if n == 0 {
                // Zero-length datagrams carry nothing (the shutdown nudge among them).
                continue;
            }
            let datagram = Bytes::copy_from_slice(&self.buf[..n]);

            let payload = if n >= CHUNK_MAGIC.len() && datagram[..CHUNK_MAGIC.len()] == CHUNK_MAGIC
            {
                match self.reassembler.offer(datagram.slice(CHUNK_MAGIC.len()..)) {
                    Ok(Some(payload)) => payload,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!("dropping chunk: {}", err);
                        continue;
                    }
                }
            } else {
                datagram
            };

            let envelope = match compress::decompress(&payload) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!("dropping datagram: {}", err);
                    continue;
                }
            };
            match Message::from_envelope(&envelope) {
                Ok(msg) => return Ok(msg),
                Err(err) => {
                    warn!("dropping envelope: {}", err);
                    continue;
                }
            }
        }
    }
}

/// The byte-source adapter: yields the text of the next message -- `short`, or `full` when
/// `short` is empty -- truncated to the caller's buffer.
impl std::io::Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let msg = self.read_message().map_err(|err| match err {
            Error::Io { source, .. } => source,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        })?;
        let text = if msg.short.is_empty() {
            &msg.full
        } else {
            &msg.short
        };
        let n = text.len().min(buf.len());
        buf[..n].copy_from_slice(&text.as_bytes()[..n]);
        Ok(n)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         struct Shutdown                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A handle for closing a [`Reader`] from another thread.
pub struct Shutdown {
    target: SocketAddr,
    closed: Arc<AtomicBool>,
}

impl Shutdown {
    /// Mark the reader closed & nudge its socket with an empty datagram so a parked receive
    /// wakes to notice. The reader's next (or current) [`read_message`](Reader::read_message)
    /// fails with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let nudge = match self.target {
            SocketAddr::V4(_) => UdpSocket::bind("0.0.0.0:0"),
            SocketAddr::V6(_) => UdpSocket::bind("[::]:0"),
        }?;
        nudge.send_to(&[], self.target)?;
        Ok(())
    }
}

/// An unspecified bound address cannot be sent to; aim the nudge at the loopback of the same
/// family instead.
fn nudge_target(mut addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        match addr.ip() {
            IpAddr::V4(_) => addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            IpAddr::V6(_) => addr.set_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        }
    }
    addr
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::writer::Writer;

    use std::io::{Read as _, Write as _};

    #[test]
    fn test_close_unblocks_a_parked_receive() {
        let mut reader = Reader::bind("127.0.0.1:0").unwrap();
        let shutdown = reader.shutdown_handle().unwrap();
        let closer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            shutdown.close().unwrap();
        });
        assert!(matches!(reader.read_message(), Err(Error::Closed { .. })));
        closer.join().unwrap();
    }

    /// Junk on the port -- unrecognized leaders, truncated chunk headers -- is skipped, not
    /// fatal; the next intact message still comes through.
    #[test]
    fn test_junk_datagrams_are_skipped() {
        let mut reader = Reader::bind("127.0.0.1:0").unwrap();
        let addr = reader.local_addr().unwrap();

        let junk = UdpSocket::bind("127.0.0.1:0").unwrap();
        junk.send_to(&[0x00, 0x01, 0x02], addr).unwrap();
        let mut truncated_chunk = Vec::from(&CHUNK_MAGIC[..]);
        truncated_chunk.extend_from_slice(&[0x12, 0x34]);
        junk.send_to(&truncated_chunk, addr).unwrap();

        let mut writer = Writer::new(addr).unwrap();
        writer.write(b"still here").unwrap();

        assert_eq!(reader.read_message().unwrap().short, "still here");
    }

    /// One lost chunk means no message: an incomplete burst never surfaces, while a complete
    /// message on the same port still does.
    #[test]
    fn test_no_partial_deliveries() {
        let mut reader = Reader::bind("127.0.0.1:0").unwrap();
        let addr = reader.local_addr().unwrap();

        // Chunk 0 of 2; its sibling never arrives.
        let orphan = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut chunk = Vec::from(&CHUNK_MAGIC[..]);
        chunk.extend_from_slice(&7u64.to_be_bytes());
        chunk.extend_from_slice(&[0, 2]);
        chunk.extend_from_slice(b"{\"version\":");
        orphan.send_to(&chunk, addr).unwrap();

        let writer = Writer::new(addr).unwrap();
        writer
            .write_message(&Message {
                short: "whole".to_owned(),
                ..Message::default()
            })
            .unwrap();

        assert_eq!(reader.read_message().unwrap().short, "whole");
    }

    #[test]
    fn test_read_yields_message_text() {
        let mut reader = Reader::bind("127.0.0.1:0").unwrap();
        let mut writer = Writer::new(reader.local_addr().unwrap()).unwrap();
        writer.write(b"awesomesauce\nbananas").unwrap();

        let mut buf = [0u8; 64];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"awesomesauce");
    }

    /// When `short` & `full` diverge, `read` yields `short`; `full` only stands in for an
    /// empty `short`.
    #[test]
    fn test_read_prefers_short() {
        let mut reader = Reader::bind("127.0.0.1:0").unwrap();
        let writer = Writer::new(reader.local_addr().unwrap()).unwrap();
        writer
            .write_message(&Message {
                short: "headline".to_owned(),
                full: "something else entirely\nacross two lines".to_owned(),
                ..Message::default()
            })
            .unwrap();

        let mut buf = [0u8; 64];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"headline");

        // No short on the wire at all: fall back to full.
        let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
        raw.send_to(
            br#"{"version":"1.1","host":"bree","short_message":"","full_message":"the long form","timestamp":1.0,"level":6}"#,
            reader.local_addr().unwrap(),
        )
        .unwrap();
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"the long form");
    }
}
