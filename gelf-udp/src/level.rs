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

//! GELF severity level definitions.
//!
//! GELF borrows its `level` field from syslog: an integer in the range 0 through 7, with 0 the
//! most severe. [`Level`] replicates the names used in `<syslog.h>`; the discriminants are the
//! values that appear in the JSON envelope.

type StdResult<T, E> = std::result::Result<T, E>;

/// The eight syslog severity levels, as carried in a GELF envelope's `level` field. The
/// enumeration values duplicate the constants documented in the `syslog()` manual [page] &
/// defined in `<syslog.h>`.
///
/// [page]: https://man7.org/linux/man-pages/man3/syslog.3.html
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Level {
    /// system is unusable
    LOG_EMERG = 0,
    /// action must be take immediately
    LOG_ALERT = 1,
    /// critical conditions
    LOG_CRIT = 2,
    /// error conditions
    LOG_ERR = 3,
    /// warning conditions
    LOG_WARNING = 4,
    /// normal, but significant condition
    LOG_NOTICE = 5,
    /// informational message
    LOG_INFO = 6,
    /// debug-level message
    LOG_DEBUG = 7,
}

impl std::default::Default for Level {
    /// The default level is `LOG_INFO`, matching the envelope default.
    fn default() -> Self {
        Level::LOG_INFO
    }
}

impl Level {
    /// Map a severity value received off the wire back onto a [`Level`]. Values beyond the
    /// syslog range saturate to `LOG_DEBUG`; a collector shouldn't drop an otherwise intact
    /// message over one out-of-range field.
    pub fn from_severity(severity: u8) -> Level {
        match severity {
            0 => Level::LOG_EMERG,
            1 => Level::LOG_ALERT,
            2 => Level::LOG_CRIT,
            3 => Level::LOG_ERR,
            4 => Level::LOG_WARNING,
            5 => Level::LOG_NOTICE,
            6 => Level::LOG_INFO,
            _ => Level::LOG_DEBUG,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                Level::LOG_EMERG => "LOG_EMERG",
                Level::LOG_ALERT => "LOG_ALERT",
                Level::LOG_CRIT => "LOG_CRIT",
                Level::LOG_ERR => "LOG_ERR",
                Level::LOG_WARNING => "LOG_WARNING",
                Level::LOG_NOTICE => "LOG_NOTICE",
                Level::LOG_INFO => "LOG_INFO",
                Level::LOG_DEBUG => "LOG_DEBUG",
            }
        )
    }
}

#[cfg(test)]
mod level_tests {
    use super::*;
    /// Test the wire representation both ways
    #[test]
    fn test_severity() {
        assert_eq!(6, Level::LOG_INFO as u8);
        assert_eq!(Level::from_severity(3), Level::LOG_ERR);
        assert_eq!(Level::from_severity(250), Level::LOG_DEBUG);
        assert_eq!(format!("{}", Level::LOG_WARNING), "LOG_WARNING".to_string());
        assert_eq!(format!("{:?}", Level::LOG_WARNING), "LOG_WARNING".to_string());
    }
}
