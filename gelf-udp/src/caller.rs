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

//! Locating the caller's source position
//! =====================================
//!
//! # Introduction
//!
//! When the [`Writer`](crate::writer::Writer) is handed to a logging facade as a plain byte
//! sink, the bytes arrive with no record of where in the program they originated; the only way
//! to recover a source file & line for the `_file`/`_line` extras is to walk the call stack and
//! skip past every frame that belongs to the plumbing -- this module, and the facade itself.
//!
//! # Discussion
//!
//! Stack introspection is inherently platform-specific & best-effort: symbols may be missing,
//! frames may be inlined away in optimized builds. Every operation here therefore degrades to
//! the sentinel `("???", 0)` rather than failing; a log record with an unknown source position
//! is still worth shipping.

/// What [`get_caller`] & friends return when the requested frame cannot be resolved.
pub const UNKNOWN_CALLER: (&str, u32) = ("???", 0);

/// Path fragments identifying the usual logging facades, suitable as the `ignore` argument of
/// [`get_caller_ignoring`]: matches the cargo-registry directories of the `log` & `tracing`
/// crates.
pub const DEFAULT_FACADE_PATHS: [&str; 2] = ["/log-", "/tracing-"];

fn sentinel() -> (String, u32) {
    (UNKNOWN_CALLER.0.to_owned(), UNKNOWN_CALLER.1)
}

/// Resolve the current call stack to `(file, line)` pairs, innermost first, with the walk's own
/// frames (this module & the `backtrace` machinery) already dropped from the front.
#[inline(never)]
fn call_stack() -> Vec<(String, u32)> {
    let mut frames = Vec::new();
    backtrace::trace(|frame| {
        backtrace::resolve_frame(frame, |symbol| {
            if let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) {
                frames.push((file.to_string_lossy().into_owned(), line));
            }
        });
        true
    });

    let first_caller = frames
        .iter()
        .position(|(file, _)| !is_walker_frame(file))
        .unwrap_or(frames.len());
    frames.split_off(first_caller)
}

fn is_walker_frame(file: &str) -> bool {
    file.ends_with("caller.rs") || file.contains("/backtrace-") || file.contains("/backtrace/")
}

/// The source position of the frame `skip` levels above the caller of this function, or the
/// sentinel `("???", 0)` if the stack isn't that deep (or can't be resolved at all).
#[inline(never)]
pub fn get_caller(skip: usize) -> (String, u32) {
    call_stack().into_iter().nth(skip).unwrap_or_else(sentinel)
}

/// As [`get_caller`], but first discard every frame whose file path contains any of the
/// `ignore` fragments -- the logging facade's directory, whatever that is in the deployment at
/// hand (see [`DEFAULT_FACADE_PATHS`]). `skip` then counts the frames that remain.
#[inline(never)]
pub fn get_caller_ignoring<S: AsRef<str>>(ignore: &[S], skip: usize) -> (String, u32) {
    call_stack()
        .into_iter()
        .filter(|(file, _)| !ignore.iter().any(|fragment| file.contains(fragment.as_ref())))
        .nth(skip)
        .unwrap_or_else(sentinel)
}

#[cfg(test)]
mod test {
    use super::*;

    // The positive cases (a real file & line come back) are exercised from `writer.rs`, whose
    // tests sit outside this file & so survive the walker-frame filter.

    #[test]
    fn test_deep_skip_yields_the_sentinel() {
        let (file, line) = get_caller(1000);
        assert_eq!((file.as_str(), line), UNKNOWN_CALLER);

        let (file, line) = get_caller_ignoring(&DEFAULT_FACADE_PATHS, 1000);
        assert_eq!((file.as_str(), line), UNKNOWN_CALLER);
    }
}
