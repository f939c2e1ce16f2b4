// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Plain-text log-file protocol.
//!
//! Shares the file engine (rotation, size limits, part pruning) with the
//! binary protocol but renders log entries through the pattern-based text
//! formatter and opens files with a UTF-8 byte-order mark instead of the
//! binary magic. Encryption is not available for text files.

use silog_common::LookupTable;

use crate::connections::ConnectionsBuilder;
use crate::formatter::{Formatter, TextFormatter, DEFAULT_PATTERN};
use crate::packet::Packet;
use crate::protocol::file::{FileEngine, FileOptions, HeaderKind};
use crate::protocol::ProtocolImpl;
use crate::Result;

const DEFAULT_FILENAME: &str = "log.txt";

pub struct TextProtocol {
    engine: FileEngine,
    formatter: TextFormatter,
    pattern: String,
    indent: bool,
}

impl TextProtocol {
    pub fn new() -> TextProtocol {
        TextProtocol {
            engine: FileEngine::new(
                FileOptions::load(&LookupTable::new(), DEFAULT_FILENAME),
                HeaderKind::Text,
            ),
            formatter: TextFormatter::default(),
            pattern: String::from(DEFAULT_PATTERN),
            indent: false,
        }
    }
}

impl Default for TextProtocol {
    fn default() -> Self {
        TextProtocol::new()
    }
}

impl ProtocolImpl for TextProtocol {
    fn name(&self) -> &'static str {
        "text"
    }

    fn is_valid_option(&self, key: &str) -> bool {
        matches!(
            key,
            "filename" | "append" | "buffer" | "rotate" | "maxsize" | "maxparts" | "pattern"
                | "indent"
        )
    }

    fn load_options(&mut self, options: &LookupTable) {
        self.pattern = options.get_string("pattern", DEFAULT_PATTERN);
        self.indent = options.get_bool("indent", false);
        self.formatter = TextFormatter::new(&self.pattern, self.indent);
        self.engine = FileEngine::new(
            FileOptions::load(options, DEFAULT_FILENAME),
            HeaderKind::Text,
        );
    }

    fn build_options(&self, builder: &mut ConnectionsBuilder) {
        self.engine.options().build(builder);
        if self.pattern != DEFAULT_PATTERN {
            builder.add_option("pattern", &self.pattern);
        }
        if self.indent {
            builder.add_option("indent", true);
        }
    }

    fn internal_connect(&mut self) -> Result<()> {
        self.engine.connect()
    }

    fn internal_write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.engine.write_packet(&mut self.formatter, packet)
    }

    fn internal_disconnect(&mut self) -> Result<()> {
        self.engine.disconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{LogEntry, Watch, WatchType};
    use silog_common::Level;
    use std::fs;

    fn entry(title: &str) -> Packet {
        let mut entry = LogEntry::new(Level::Message, title);
        entry.timestamp = 0;
        Packet::from(entry)
    }

    #[test]
    fn test_writes_bom_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut table = LookupTable::new();
        table.put("filename", path.to_str().unwrap());
        table.put("pattern", "%level%: %title%");

        let mut protocol = TextProtocol::new();
        protocol.load_options(&table);
        protocol.internal_connect().unwrap();
        protocol.internal_write_packet(&entry("first")).unwrap();
        protocol.internal_write_packet(&entry("second")).unwrap();
        protocol.internal_disconnect().unwrap();

        let content = fs::read(&path).unwrap();
        assert_eq!(&content[..3], b"\xef\xbb\xbf");
        let text = String::from_utf8(content[3..].to_vec()).unwrap();
        assert_eq!(text, "message: first\r\nmessage: second\r\n");
    }

    #[test]
    fn test_non_log_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut table = LookupTable::new();
        table.put("filename", path.to_str().unwrap());

        let mut protocol = TextProtocol::new();
        protocol.load_options(&table);
        protocol.internal_connect().unwrap();
        protocol
            .internal_write_packet(&Packet::from(Watch::new(
                Level::Debug,
                "w",
                "1",
                WatchType::Int,
            )))
            .unwrap();
        protocol.internal_disconnect().unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_append_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut table = LookupTable::new();
        table.put("filename", path.to_str().unwrap());
        table.put("append", "true");
        table.put("pattern", "%title%");

        for round in 0..2 {
            let mut protocol = TextProtocol::new();
            protocol.load_options(&table);
            protocol.internal_connect().unwrap();
            protocol
                .internal_write_packet(&entry(&round.to_string()))
                .unwrap();
            protocol.internal_disconnect().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(&content[3..], "0\r\n1\r\n");
    }
}
