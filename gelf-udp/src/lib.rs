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
//! A client/server codec pair for [GELF] -- the Graylog Extended Log Format -- over UDP.
//!
//! [GELF]: https://go2docs.graylog.org/current/getting_in_log_data/gelf.html
//!
//! # Introduction
//!
//! GELF is JSON-over-UDP: one log record is one JSON object, optionally gzip- or
//! zlib-compressed, carried in a single datagram -- or, when it outgrows the datagram budget,
//! cut into up to 128 *chunks* that the receiver reassembles by message id. This crate supplies
//! both ends:
//!
//! - [`writer::Writer`] encodes [`message::Message`]s, compresses them, chunks them & sends
//!   them to a collector. It also implements [`std::io::Write`], so it can be installed as the
//!   byte sink of a logging facade; on that path it walks the call stack (see [`caller`]) to
//!   recover the log statement's source position.
//! - [`reader::Reader`] binds the collector's socket, reassembles & decompresses what arrives,
//!   & yields decoded [`message::Message`]s.
//!
//! UDP's nature is deliberately surfaced, not hidden: sends are best-effort & unacknowledged;
//! chunks may arrive in any order, duplicated, or never; incomplete messages are discarded
//! after a timeout. See [`reassembly`] for how the receiving side copes.
//!
//! # Usage
//!
//! The quickest route from a [`tracing`] program to a Graylog collector is the bundled
//! [`Layer`](layer::Layer):
//!
//! ```no_run
//! use gelf_udp::layer::Layer;
//! use tracing::info;
//! use tracing_subscriber::layer::SubscriberExt; // Needed to get `with()`
//! use tracing_subscriber::registry::Registry;
//!
//! let subscriber = Registry::default().with(Layer::try_default().unwrap());
//! let _guard = tracing::subscriber::set_default(subscriber);
//!
//! info!("Hello, world!");
//! ```
//!
//! The endpoints are also perfectly usable on their own:
//!
//! ```rust
//! use gelf_udp::{message::Message, reader::Reader, writer::Writer};
//!
//! let mut reader = Reader::bind("127.0.0.1:0").unwrap();
//! let writer = Writer::new(reader.local_addr().unwrap()).unwrap();
//!
//! writer
//!     .write_message(&Message {
//!         full: "awesomesauce\nbananas".to_owned(),
//!         ..Message::default()
//!     })
//!     .unwrap();
//!
//! let msg = reader.read_message().unwrap();
//! assert_eq!(msg.short, "awesomesauce");
//! ```

pub mod caller;
pub mod chunk;
pub mod compress;
pub mod layer;
pub mod level;
pub mod message;
pub mod reader;
pub mod reassembly;
pub mod writer;
