// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

/// Severity of a log packet.
///
/// Levels are totally ordered. `Control` sits above every log level and is
/// reserved for control-command packets, which bypass level filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    #[default]
    Debug,
    Verbose,
    Message,
    Warning,
    Error,
    Fatal,
    Control,
}

impl Level {
    /// Parses a level name as it appears in a connections string.
    ///
    /// Matching is case-insensitive; `Control` is deliberately not
    /// accepted here, it cannot be assigned through options.
    pub fn from_name(name: &str) -> Option<Level> {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Level::Debug),
            "verbose" => Some(Level::Verbose),
            "message" => Some(Level::Message),
            "warning" => Some(Level::Warning),
            "error" => Some(Level::Error),
            "fatal" => Some(Level::Fatal),
            _ => None,
        }
    }

    /// Numeric tag used by the wire format.
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<Level> {
        Some(match tag {
            0 => Level::Debug,
            1 => Level::Verbose,
            2 => Level::Message,
            3 => Level::Warning,
            4 => Level::Error,
            5 => Level::Fatal,
            6 => Level::Control,
            _ => return None,
        })
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Debug => "debug",
            Level::Verbose => "verbose",
            Level::Message => "message",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
            Level::Control => "control",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError(String);

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown log level {:?}", self.0)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::from_name(s).ok_or_else(|| ParseLevelError(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("debug", Level::Debug)]
    #[case("Verbose", Level::Verbose)]
    #[case(" MESSAGE ", Level::Message)]
    #[case("warning", Level::Warning)]
    #[case("error", Level::Error)]
    #[case("fatal", Level::Fatal)]
    fn test_from_name(#[case] input: &str, #[case] expected: Level) {
        assert_eq!(Level::from_name(input), Some(expected));
    }

    #[test]
    fn test_from_name_rejects_control_and_garbage() {
        assert_eq!(Level::from_name("control"), None);
        assert_eq!(Level::from_name("warn"), None);
        assert_eq!(Level::from_name(""), None);
    }

    #[test]
    fn test_ordering() {
        assert!(Level::Debug < Level::Verbose);
        assert!(Level::Verbose < Level::Message);
        assert!(Level::Message < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Fatal);
        assert!(Level::Fatal < Level::Control);
    }

    #[test]
    fn test_tag_round_trip() {
        for level in [
            Level::Debug,
            Level::Verbose,
            Level::Message,
            Level::Warning,
            Level::Error,
            Level::Fatal,
            Level::Control,
        ] {
            assert_eq!(Level::from_tag(level.tag()), Some(level));
        }
        assert_eq!(Level::from_tag(7), None);
    }
}
