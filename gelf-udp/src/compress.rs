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

//! Envelope compression & decompression
//! ====================================
//!
//! A GELF envelope travels over the wire either as-is, or wrapped in gzip or zlib framing.
//! There is no header to announce the choice; the receiver recognizes the format from the
//! leading bytes of the payload (see [`decompress`]). Both halves of the codec live here:
//! [`compress`] for the [`Writer`], [`decompress`] for the [`Reader`].
//!
//! [`Writer`]: crate::writer::Writer
//! [`Reader`]: crate::reader::Reader

use backtrace::Backtrace;
use bytes::{BufMut, Bytes, BytesMut};
use flate2::{
    read::{GzDecoder, ZlibDecoder},
    write::{GzEncoder, ZlibEncoder},
};

use std::io::{Read, Write};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Compression layer errors
#[non_exhaustive]
pub enum Error {
    /// I/O error while running a payload through a DEFLATE-family codec
    Io {
        source: std::io::Error,
        back: Backtrace,
    },
    /// The payload opens with bytes that announce neither gzip, nor zlib, nor bare JSON
    UnknownFormat { leader: Vec<u8>, back: Backtrace },
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
            Error::UnknownFormat { leader, .. } => {
                write!(f, "{:02x?} announces no known payload format", leader)
            }
            _ => write!(f, "compression layer error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::UnknownFormat { leader: _, back } => write!(f, "{}\n{:#?}", self, back),
            _ => write!(f, "{}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What sort of compression to apply to outgoing envelopes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CompressionType {
    /// gzip framing (RFC 1952)
    #[default]
    Gzip,
    /// zlib framing (RFC 1950)
    Zlib,
    /// send the envelope as-is
    None,
}

/// How hard to compress. The four conventional DEFLATE-family settings.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CompressionLevel {
    /// store only
    NoCompression,
    /// fastest
    BestSpeed,
    /// the zlib default
    #[default]
    Default,
    /// smallest output
    BestCompression,
}

impl CompressionLevel {
    pub fn as_flate2(&self) -> flate2::Compression {
        match self {
            CompressionLevel::NoCompression => flate2::Compression::none(),
            CompressionLevel::BestSpeed => flate2::Compression::fast(),
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::BestCompression => flate2::Compression::best(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      compress/decompress                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Wrap `buf` in the requested framing at the requested level. Stateless per call;
/// [`CompressionType::None`] is the identity.
pub fn compress(buf: &[u8], kind: CompressionType, level: CompressionLevel) -> Result<Bytes> {
    match kind {
        CompressionType::None => Ok(Bytes::copy_from_slice(buf)),
        CompressionType::Gzip => {
            let mut enc = GzEncoder::new(
                BytesMut::with_capacity(buf.len()).writer(),
                level.as_flate2(),
            );
            enc.write_all(buf)?;
            Ok(enc.finish()?.into_inner().freeze())
        }
        CompressionType::Zlib => {
            let mut enc = ZlibEncoder::new(
                BytesMut::with_capacity(buf.len()).writer(),
                level.as_flate2(),
            );
            enc.write_all(buf)?;
            Ok(enc.finish()?.into_inner().freeze())
        }
    }
}

/// Undo [`compress`], recognizing the framing from the leading bytes:
///
/// - `1f 8b` is the gzip magic;
/// - a leading `78` whose two-byte header is divisible by 31 is a zlib stream (the RFC 1950
///   FCHECK rule, which admits `78 01`, `78 5e`, `78 9c` & `78 da`);
/// - `7b` (`{`) is an uncompressed envelope;
/// - anything else fails with [`Error::UnknownFormat`].
pub fn decompress(buf: &[u8]) -> Result<Bytes> {
    if buf.len() >= 2 && buf[0] == 0x1f && buf[1] == 0x8b {
        let mut plain = Vec::with_capacity(buf.len() * 2);
        GzDecoder::new(buf).read_to_end(&mut plain)?;
        Ok(Bytes::from(plain))
    } else if buf.len() >= 2 && buf[0] == 0x78 && (u16::from_be_bytes([buf[0], buf[1]]) % 31) == 0 {
        let mut plain = Vec::with_capacity(buf.len() * 2);
        ZlibDecoder::new(buf).read_to_end(&mut plain)?;
        Ok(Bytes::from(plain))
    } else if buf.first() == Some(&b'{') {
        Ok(Bytes::copy_from_slice(buf))
    } else {
        Err(Error::UnknownFormat {
            leader: buf.iter().take(2).copied().collect(),
            back: Backtrace::new(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trips() {
        let text = b"{\"short_message\":\"Hello, world!\"}";
        for kind in [
            CompressionType::Gzip,
            CompressionType::Zlib,
            CompressionType::None,
        ] {
            for level in [
                CompressionLevel::NoCompression,
                CompressionLevel::BestSpeed,
                CompressionLevel::Default,
                CompressionLevel::BestCompression,
            ] {
                let wire = compress(text, kind, level).unwrap();
                assert_eq!(&decompress(&wire).unwrap()[..], &text[..]);
            }
        }
    }

    #[test]
    fn test_magic_detection() {
        let gz = compress(b"{}", CompressionType::Gzip, CompressionLevel::Default).unwrap();
        assert_eq!(&gz[..2], &[0x1f, 0x8b]);

        let zl = compress(b"{}", CompressionType::Zlib, CompressionLevel::Default).unwrap();
        assert_eq!(zl[0], 0x78);
        assert_eq!(u16::from_be_bytes([zl[0], zl[1]]) % 31, 0);

        assert!(matches!(
            decompress(b"\x00\x01garbage"),
            Err(Error::UnknownFormat { .. })
        ));
        assert!(matches!(decompress(b""), Err(Error::UnknownFormat { .. })));
    }

    /// A zlib stream compressed at `NoCompression` opens with `78 01`; make sure the FCHECK
    /// rule admits it (a plain first-byte-pair comparison against `78 9c` would not).
    #[test]
    fn test_stored_zlib_header() {
        let wire = compress(
            b"{\"version\":\"1.1\"}",
            CompressionType::Zlib,
            CompressionLevel::NoCompression,
        )
        .unwrap();
        assert_eq!(&decompress(&wire).unwrap()[..], b"{\"version\":\"1.1\"}");
    }
}
