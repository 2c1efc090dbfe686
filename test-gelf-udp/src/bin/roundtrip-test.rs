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

//! Exercise a writer/reader pair over loopback: one small message, one big enough to chunk.

use gelf_udp::{
    compress::CompressionType, message::Message, reader::Reader, writer::Writer,
};

pub fn main() {
    let mut reader = Reader::bind("127.0.0.1:0").unwrap();
    let addr = reader.local_addr().unwrap();
    println!("reader bound at {}", addr);

    let collector = std::thread::spawn(move || {
        for _ in 0..3 {
            let msg = reader.read_message().unwrap();
            println!(
                "[{}] {} {}: {}",
                msg.time_unix, msg.host, msg.level, msg.short
            );
        }
    });

    let writer = Writer::builder()
        .facility("roundtrip-test")
        .connect(addr)
        .unwrap();

    writer
        .write_message(&Message {
            full: "awesomesauce\nbananas".to_owned(),
            ..Message::default()
        })
        .unwrap();

    // Entropic enough that even gzip can't fit it in one datagram.
    let big: String = std::iter::repeat_with(random_char).take(16384).collect();
    writer
        .write_message(&Message {
            full: format!("one big message\n{}", big),
            ..Message::default()
        })
        .unwrap();

    let plain = Writer::builder()
        .compression_type(CompressionType::None)
        .facility("roundtrip-test")
        .connect(addr)
        .unwrap();
    plain
        .write_message(&Message {
            full: "uncompressed, as a treat".to_owned(),
            ..Message::default()
        })
        .unwrap();

    collector.join().unwrap();
}

fn random_char() -> char {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    ALPHABET[rand::random::<usize>() % ALPHABET.len()] as char
}
