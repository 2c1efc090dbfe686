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

//! Reassembly of chunked messages
//! ==============================
//!
//! # Introduction
//!
//! UDP promises nothing: the chunks of one message may arrive out of order, interleaved with
//! chunks of other messages, duplicated, or not at all. The [`Reassembler`] is a table of
//! in-flight messages keyed by message id; each [`offer`](Reassembler::offer)ed chunk is filed
//! under its id, and the moment the last fragment of a message lands, the reassembled payload
//! comes back to the caller and the entry is gone.
//!
//! # Discussion
//!
//! Incomplete messages cannot be allowed to accumulate, so the table is bounded two ways:
//! entries older than the reassembly timeout are swept on each insert (the table never exceeds
//! 128 entries by default, so the sweep is cheap), and when the table is full the oldest
//! incomplete entry makes way for the newcomer. Both evictions are ordinary UDP loss as far as
//! the protocol is concerned & are only noted in this crate's own `tracing` output.
//!
//! The table is meant to be owned by the single thread calling
//! [`Reader::read_message`](crate::reader::Reader::read_message); nothing here locks. Running
//! several receiver threads against one socket calls for one `Reassembler` per thread (ids are
//! random, so a message's chunks must all be handled by whichever thread holds its entry) or a
//! lock around this one.

use crate::chunk::{self, ChunkHeader};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long an incomplete message may sit in the table.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(5);
/// How many incomplete messages the table will hold.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 128;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       reassembly entries                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One in-flight message: the declared chunk count, a bitmap of the sequence numbers seen so
/// far, the fragments themselves & the arrival time of the first chunk.
struct Entry {
    count: u8,
    arrived: u128,
    fragments: Vec<Bytes>,
    first_seen: Instant,
}

impl Entry {
    fn new(count: u8, now: Instant) -> Entry {
        Entry {
            count,
            arrived: 0,
            fragments: vec![Bytes::new(); count as usize],
            first_seen: now,
        }
    }

    fn has(&self, sequence: u8) -> bool {
        self.arrived & (1 << sequence) != 0
    }

    fn add(&mut self, sequence: u8, fragment: Bytes) {
        self.arrived |= 1 << sequence;
        self.fragments[sequence as usize] = fragment;
    }

    fn complete(&self) -> bool {
        self.arrived.count_ones() == u32::from(self.count)
    }

    fn assemble(self) -> Bytes {
        let mut payload =
            BytesMut::with_capacity(self.fragments.iter().map(Bytes::len).sum());
        for fragment in &self.fragments {
            payload.extend_from_slice(fragment);
        }
        payload.freeze()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       struct Reassembler                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The table of in-flight chunked messages.
pub struct Reassembler {
    entries: HashMap<u64, Entry>,
    timeout: Duration,
    max_in_flight: usize,
}

impl std::default::Default for Reassembler {
    fn default() -> Self {
        Reassembler::new(DEFAULT_REASSEMBLY_TIMEOUT, DEFAULT_MAX_IN_FLIGHT)
    }
}

impl Reassembler {
    pub fn new(timeout: Duration, max_in_flight: usize) -> Reassembler {
        Reassembler {
            entries: HashMap::new(),
            timeout,
            max_in_flight,
        }
    }

    /// File one chunk, magic already stripped by the caller. Returns the reassembled payload
    /// the moment the final fragment of a message arrives, `None` otherwise.
    ///
    /// A structurally bad header is an error; everything else that can go wrong with a chunk
    /// (count disagreement, duplication, eviction of its siblings) is UDP weather, logged &
    /// absorbed here.
    pub fn offer(&mut self, mut chunk: Bytes) -> chunk::Result<Option<Bytes>> {
        let header = ChunkHeader::parse(&mut chunk)?;
        let now = Instant::now();
        self.sweep(now);

        if let Some(entry) = self.entries.get_mut(&header.message_id) {
            if entry.count != header.count {
                warn!(
                    message_id = header.message_id,
                    stored = entry.count,
                    received = header.count,
                    "chunk disagrees with its siblings about the chunk count; dropping it"
                );
                return Ok(None);
            }
            if entry.has(header.sequence) {
                debug!(
                    message_id = header.message_id,
                    sequence = header.sequence,
                    "duplicate chunk"
                );
                return Ok(None);
            }
            entry.add(header.sequence, chunk);
            if entry.complete() {
                return Ok(self.entries.remove(&header.message_id).map(Entry::assemble));
            }
            return Ok(None);
        }

        if self.entries.len() >= self.max_in_flight {
            self.evict_oldest();
        }
        let mut entry = Entry::new(header.count, now);
        entry.add(header.sequence, chunk);
        if entry.complete() {
            // A one-chunk message never touches the table.
            return Ok(Some(entry.assemble()));
        }
        self.entries.insert(header.message_id, entry);
        Ok(None)
    }

    /// The number of incomplete messages currently buffered.
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    /// Drop entries older than the reassembly timeout.
    fn sweep(&mut self, now: Instant) {
        let timeout = self.timeout;
        self.entries.retain(|message_id, entry| {
            let keep = now.duration_since(entry.first_seen) <= timeout;
            if !keep {
                warn!(
                    message_id = *message_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "message was not fully received within the reassembly timeout; discarding it"
                );
            }
            keep
        });
    }

    /// Make room for a newcomer by discarding the entry that has been waiting the longest.
    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.first_seen)
            .map(|(message_id, _)| *message_id)
        {
            self.entries.remove(&oldest);
            warn!(
                message_id = oldest,
                "reassembly table is full; evicting the oldest incomplete message"
            );
        }
    }
}
