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

//! The GELF chunk wire format
//! ==========================
//!
//! An envelope that fits within the datagram budget travels as a single datagram, verbatim.
//! A larger envelope is cut into *chunks*, each prefixed with a twelve-byte header:
//!
//! ```text
//! offset  size  field
//! 0       2     magic: 0x1e, 0x0f
//! 2       8     message id (opaque, random, big-endian on the wire)
//! 10      1     sequence number (0-based)
//! 11      1     sequence count (1..=128)
//! 12      ..    payload fragment
//! ```
//!
//! The sequence count is a single byte capped at 128 by the protocol, which in turn caps the
//! size of any one message at `128 * (max_datagram_size - 12)` bytes; [`split`] refuses larger
//! envelopes up front rather than emit a partial burst. The receiving half of the format lives
//! in [`ChunkHeader::parse`]; reassembly of the fragments is the business of
//! [`Reassembler`](crate::reassembly::Reassembler).

use backtrace::Backtrace;
use bytes::{Buf, BufMut, Bytes, BytesMut};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Chunk codec errors
#[non_exhaustive]
pub enum Error {
    /// The envelope cannot be carried in 128 chunks
    MessageTooLarge {
        size: usize,
        limit: usize,
        back: Backtrace,
    },
    /// A chunk header failed structural validation
    MalformedChunk {
        len: usize,
        sequence: u8,
        count: u8,
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
            Error::MessageTooLarge { size, limit, .. } => write!(
                f,
                "a {} byte envelope exceeds the {} bytes 128 chunks can carry",
                size, limit
            ),
            Error::MalformedChunk {
                len,
                sequence,
                count,
                ..
            } => write!(
                f,
                "malformed chunk ({} bytes, sequence {} of {})",
                len, sequence, count
            ),
            _ => write!(f, "chunk codec error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::MessageTooLarge { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::MalformedChunk { back, .. } => write!(f, "{}\n{:#?}", self, back),
            _ => write!(f, "{}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the wire format                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Leading two bytes of every chunked datagram.
pub const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];
/// Magic, message id, sequence number, sequence count.
pub const CHUNK_HEADER_LEN: usize = 12;
/// The sequence count field is one byte, capped by the protocol at 128.
pub const MAX_CHUNK_COUNT: usize = 128;
/// Conservative Ethernet MTU less IP & UDP headers.
pub const DEFAULT_DATAGRAM_SIZE: usize = 1420;

/// The parsed header of one chunk, magic excluded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub message_id: u64,
    pub sequence: u8,
    pub count: u8,
}

impl ChunkHeader {
    /// Parse a chunk header from `buf`, advancing it past the ten header bytes so that what
    /// remains is the payload fragment. The caller has already recognized & stripped the magic.
    pub fn parse(buf: &mut Bytes) -> Result<ChunkHeader> {
        if buf.remaining() < CHUNK_HEADER_LEN - CHUNK_MAGIC.len() {
            return Err(Error::MalformedChunk {
                len: buf.remaining(),
                sequence: 0,
                count: 0,
                back: Backtrace::new(),
            });
        }
        let message_id = buf.get_u64();
        let sequence = buf.get_u8();
        let count = buf.get_u8();
        if count == 0 || count as usize > MAX_CHUNK_COUNT || sequence >= count {
            return Err(Error::MalformedChunk {
                len: buf.remaining(),
                sequence,
                count,
                back: Backtrace::new(),
            });
        }
        Ok(ChunkHeader {
            message_id,
            sequence,
            count,
        })
    }
}

/// Split `envelope` into at most 128 datagrams of at most `max_datagram_size` bytes each.
///
/// An envelope within the budget is returned as the sole datagram, verbatim; otherwise a fresh
/// random message id is drawn & the envelope is sliced across numbered chunks. The slices share
/// the envelope's storage; only the twelve-byte headers are fresh allocations.
pub fn split(envelope: Bytes, max_datagram_size: usize) -> Result<Vec<Bytes>> {
    if envelope.len() <= max_datagram_size {
        return Ok(vec![envelope]);
    }
    if max_datagram_size <= CHUNK_HEADER_LEN {
        // A budget this small leaves no room for payload after the header.
        return Err(Error::MessageTooLarge {
            size: envelope.len(),
            limit: 0,
            back: Backtrace::new(),
        });
    }
    let fragment_len = max_datagram_size - CHUNK_HEADER_LEN;
    let count = envelope.len().div_ceil(fragment_len);
    if count > MAX_CHUNK_COUNT {
        return Err(Error::MessageTooLarge {
            size: envelope.len(),
            limit: MAX_CHUNK_COUNT * fragment_len,
            back: Backtrace::new(),
        });
    }

    let message_id: u64 = rand::random();
    let mut datagrams = Vec::with_capacity(count);
    for sequence in 0..count {
        let fragment =
            envelope.slice(sequence * fragment_len..envelope.len().min((sequence + 1) * fragment_len));
        let mut datagram = BytesMut::with_capacity(CHUNK_HEADER_LEN + fragment.len());
        datagram.put_slice(&CHUNK_MAGIC);
        datagram.put_u64(message_id);
        datagram.put_u8(sequence as u8);
        datagram.put_u8(count as u8);
        datagram.put_slice(&fragment);
        datagrams.push(datagram.freeze());
    }
    Ok(datagrams)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_small_envelope_is_passed_through() {
        let envelope = Bytes::from_static(b"{\"version\":\"1.1\"}");
        let datagrams = split(envelope.clone(), DEFAULT_DATAGRAM_SIZE).unwrap();
        assert_eq!(datagrams, vec![envelope]);
    }

    #[test]
    fn test_split_and_header_fields() {
        // 3000 bytes over a 1420-byte budget: ceil(3000/1408) = 3 chunks.
        let envelope = Bytes::from(vec![0x2a; 3000]);
        let datagrams = split(envelope.clone(), DEFAULT_DATAGRAM_SIZE).unwrap();
        assert_eq!(datagrams.len(), 3);

        let mut ids = Vec::new();
        let mut payload = Vec::new();
        for (i, datagram) in datagrams.iter().enumerate() {
            assert!(datagram.len() <= DEFAULT_DATAGRAM_SIZE);
            assert_eq!(&datagram[..2], &CHUNK_MAGIC);
            let mut body = datagram.slice(2..);
            let header = ChunkHeader::parse(&mut body).unwrap();
            assert_eq!(header.sequence as usize, i);
            assert_eq!(header.count, 3);
            ids.push(header.message_id);
            payload.extend_from_slice(&body);
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(payload, envelope);
    }

    #[test]
    fn test_oversized_envelope_is_refused() {
        let limit = MAX_CHUNK_COUNT * (DEFAULT_DATAGRAM_SIZE - CHUNK_HEADER_LEN);
        let envelope = Bytes::from(vec![0u8; limit + 1]);
        assert!(matches!(
            split(envelope, DEFAULT_DATAGRAM_SIZE),
            Err(Error::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_headers() {
        // Too short to hold id + sequence + count.
        let mut short = Bytes::from_static(&[0x12, 0x34]);
        assert!(matches!(
            ChunkHeader::parse(&mut short),
            Err(Error::MalformedChunk { .. })
        ));

        fn header(sequence: u8, count: u8) -> Bytes {
            let mut buf = BytesMut::new();
            buf.put_u64(1);
            buf.put_u8(sequence);
            buf.put_u8(count);
            buf.freeze()
        }
        assert!(matches!(
            ChunkHeader::parse(&mut header(0, 0)),
            Err(Error::MalformedChunk { .. })
        ));
        assert!(matches!(
            ChunkHeader::parse(&mut header(2, 2)),
            Err(Error::MalformedChunk { .. })
        ));
        assert!(matches!(
            ChunkHeader::parse(&mut header(0, 129)),
            Err(Error::MalformedChunk { .. })
        ));
        assert!(ChunkHeader::parse(&mut header(1, 2)).is_ok());
    }
}
