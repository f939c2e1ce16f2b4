// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Write};

use crate::formatter::Formatter;
use crate::packet::Packet;

/// Magic bytes opening a plain binary log file.
pub const BINARY_MAGIC: &[u8; 4] = b"SILF";
/// Magic bytes opening an encrypted binary log file, followed by the IV.
pub const ENCRYPTED_MAGIC: &[u8; 4] = b"SILE";

/// Serializes packets into the binary wire framing: a little-endian kind
/// tag, a little-endian payload length and the payload itself. Integers
/// are little-endian fixed width, strings and blobs are length-prefixed.
#[derive(Debug, Default)]
pub struct BinaryFormatter {
    kind: u32,
    payload: Vec<u8>,
}

impl BinaryFormatter {
    pub fn new() -> BinaryFormatter {
        BinaryFormatter::default()
    }

    fn push_i32(&mut self, value: i32) {
        self.payload.extend_from_slice(&value.to_le_bytes());
    }

    fn push_u32(&mut self, value: u32) {
        self.payload.extend_from_slice(&value.to_le_bytes());
    }

    fn push_u64(&mut self, value: u64) {
        self.payload.extend_from_slice(&value.to_le_bytes());
    }

    fn push_str(&mut self, value: &str) {
        self.push_blob(value.as_bytes());
    }

    fn push_blob(&mut self, value: &[u8]) {
        self.push_u32(value.len() as u32);
        self.payload.extend_from_slice(value);
    }
}

impl Formatter for BinaryFormatter {
    fn compile(&mut self, packet: &Packet) -> usize {
        self.kind = packet.kind().tag();
        self.payload.clear();
        match packet {
            Packet::LogEntry(e) => {
                self.push_i32(e.viewer_id);
                self.push_u32(e.level.tag());
                self.push_u32(e.color.argb());
                self.push_u64(e.timestamp);
                self.push_u32(e.process_id);
                self.push_u32(e.thread_id);
                self.push_str(&e.session_name);
                self.push_str(&e.title);
                self.push_str(&e.hostname);
                self.push_str(&e.appname);
                self.push_blob(&e.data);
            }
            Packet::ControlCommand(c) => {
                self.push_i32(c.command_type);
                self.push_blob(&c.data);
            }
            Packet::Watch(w) => {
                self.push_i32(w.watch_type);
                self.push_u32(w.level.tag());
                self.push_u64(w.timestamp);
                self.push_str(&w.name);
                self.push_str(&w.value);
            }
            Packet::ProcessFlow(p) => {
                self.push_i32(p.flow_type);
                self.push_u32(p.level.tag());
                self.push_u64(p.timestamp);
                self.push_u32(p.process_id);
                self.push_u32(p.thread_id);
                self.push_str(&p.title);
                self.push_str(&p.hostname);
            }
            Packet::LogHeader(h) => {
                let content = h.content();
                self.push_str(&content);
            }
        }
        8 + self.payload.len()
    }

    fn write(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        sink.write_all(&self.kind.to_le_bytes())?;
        sink.write_all(&(self.payload.len() as u32).to_le_bytes())?;
        sink.write_all(&self.payload)
    }
}
