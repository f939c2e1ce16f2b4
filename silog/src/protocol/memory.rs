// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory protocol.
//!
//! Keeps the most recent packets in a bounded ring buffer, formatted
//! either as framed binary or as text lines. A dispatch command carrying a
//! writer drains a snapshot of the buffer into it, prefixed with the
//! matching file header.

use std::collections::VecDeque;
use std::io::Write;

use silog_common::LookupTable;

use crate::connections::ConnectionsBuilder;
use crate::formatter::{
    BinaryFormatter, Formatter, TextFormatter, BINARY_MAGIC, DEFAULT_PATTERN,
};
use crate::packet::Packet;
use crate::protocol::{CommandPayload, ProtocolCommand, ProtocolImpl};
use crate::Result;

const DEFAULT_MAX_SIZE_KB: i64 = 2048;
const TEXT_HEADER: &[u8] = b"\xef\xbb\xbf";

pub struct MemoryProtocol {
    max_size: usize,
    as_text: bool,
    pattern: String,
    indent: bool,
    formatter: Box<dyn Formatter>,
    chunks: VecDeque<Vec<u8>>,
    size: usize,
}

impl MemoryProtocol {
    pub fn new() -> MemoryProtocol {
        MemoryProtocol {
            max_size: (DEFAULT_MAX_SIZE_KB * 1024) as usize,
            as_text: false,
            pattern: String::from(DEFAULT_PATTERN),
            indent: false,
            formatter: Box::new(BinaryFormatter::new()),
            chunks: VecDeque::new(),
            size: 0,
        }
    }

    fn header(&self) -> &'static [u8] {
        if self.as_text {
            TEXT_HEADER
        } else {
            BINARY_MAGIC
        }
    }
}

impl Default for MemoryProtocol {
    fn default() -> Self {
        MemoryProtocol::new()
    }
}

impl ProtocolImpl for MemoryProtocol {
    fn name(&self) -> &'static str {
        "mem"
    }

    fn is_valid_option(&self, key: &str) -> bool {
        matches!(key, "maxsize" | "astext" | "pattern" | "indent")
    }

    fn load_options(&mut self, options: &LookupTable) {
        self.max_size = options.get_size("maxsize", DEFAULT_MAX_SIZE_KB).max(0) as usize;
        self.as_text = options.get_bool("astext", false);
        self.pattern = options.get_string("pattern", DEFAULT_PATTERN);
        self.indent = options.get_bool("indent", false);
        self.formatter = if self.as_text {
            Box::new(TextFormatter::new(&self.pattern, self.indent))
        } else {
            Box::new(BinaryFormatter::new())
        };
    }

    fn build_options(&self, builder: &mut ConnectionsBuilder) {
        builder.add_option("maxsize", format!("{}KB", self.max_size / 1024));
        if self.as_text {
            builder.add_option("astext", true);
            builder.add_option("pattern", &self.pattern);
        }
    }

    fn internal_connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn internal_write_packet(&mut self, packet: &Packet) -> Result<()> {
        let size = self.formatter.compile(packet);
        if size == 0 {
            return Ok(());
        }
        let mut chunk = Vec::with_capacity(size);
        self.formatter.write(&mut chunk)?;
        self.size += chunk.len();
        self.chunks.push_back(chunk);
        while self.size > self.max_size {
            match self.chunks.pop_front() {
                Some(dropped) => self.size -= dropped.len(),
                None => break,
            }
        }
        Ok(())
    }

    fn internal_disconnect(&mut self) -> Result<()> {
        self.chunks.clear();
        self.size = 0;
        Ok(())
    }

    fn internal_dispatch(&mut self, command: &mut ProtocolCommand) -> Result<()> {
        if let CommandPayload::Writer(writer) = &mut command.payload {
            writer.write_all(self.header())?;
            for chunk in &self.chunks {
                writer.write_all(chunk)?;
            }
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{LogEntry, PacketKind};
    use silog_common::Level;
    use std::sync::{Arc, Mutex};

    fn entry(title: &str) -> Packet {
        let mut entry = LogEntry::new(Level::Message, title);
        entry.timestamp = 0;
        Packet::from(entry)
    }

    /// Shared buffer handed to dispatch as the flush target.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_writes_binary_snapshot() {
        let mut protocol = MemoryProtocol::new();
        protocol.load_options(&LookupTable::new());
        protocol.internal_connect().unwrap();
        let packet = entry("kept");
        protocol.internal_write_packet(&packet).unwrap();

        let buffer = SharedBuffer::default();
        let mut command = ProtocolCommand::with_writer(0, Box::new(buffer.clone()));
        protocol.internal_dispatch(&mut command).unwrap();

        let content = buffer.0.lock().unwrap().clone();
        assert_eq!(&content[..4], BINARY_MAGIC);
        assert_eq!(content.len(), 4 + packet.size());
        assert_eq!(
            u32::from_le_bytes(content[4..8].try_into().unwrap()),
            PacketKind::LogEntry.tag()
        );
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let mut protocol = MemoryProtocol::new();
        protocol.load_options(&LookupTable::new());
        // Shrink the ring to about two packets worth of bytes.
        protocol.max_size = entry("x").size() * 2;
        protocol.internal_connect().unwrap();

        for title in ["a", "b", "c"] {
            protocol.internal_write_packet(&entry(title)).unwrap();
        }
        assert_eq!(protocol.chunks.len(), 2);
        assert!(protocol.size <= protocol.max_size);
    }

    #[test]
    fn test_text_mode_renders_lines() {
        let mut table = LookupTable::new();
        table.put("astext", "true");
        table.put("pattern", "%title%");
        let mut protocol = MemoryProtocol::new();
        protocol.load_options(&table);
        protocol.internal_connect().unwrap();
        protocol.internal_write_packet(&entry("one")).unwrap();
        protocol.internal_write_packet(&entry("two")).unwrap();

        let buffer = SharedBuffer::default();
        let mut command = ProtocolCommand::with_writer(0, Box::new(buffer.clone()));
        protocol.internal_dispatch(&mut command).unwrap();

        let content = buffer.0.lock().unwrap().clone();
        assert_eq!(&content[..3], TEXT_HEADER);
        assert_eq!(&content[3..], b"one\r\ntwo\r\n");
    }

    #[test]
    fn test_disconnect_clears_the_buffer() {
        let mut protocol = MemoryProtocol::new();
        protocol.load_options(&LookupTable::new());
        protocol.internal_write_packet(&entry("gone")).unwrap();
        protocol.internal_disconnect().unwrap();
        assert!(protocol.chunks.is_empty());
        assert_eq!(protocol.size, 0);
    }
}
