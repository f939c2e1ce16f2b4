// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named-pipe protocol.
//!
//! Streams framed packets into a local named pipe: `\\.\pipe\<name>` on
//! Windows, a filesystem FIFO path on Unix. The pipe is write-only, so
//! unlike TCP there is no banner handshake and no per-packet
//! acknowledgement; the log header is still emitted on connect.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use silog_common::LookupTable;
use tracing::debug;

use crate::connections::ConnectionsBuilder;
use crate::formatter::{BinaryFormatter, Formatter};
use crate::packet::Packet;
use crate::protocol::ProtocolImpl;
use crate::Result;

const DEFAULT_PIPE_NAME: &str = "smartinspect";

pub struct PipeProtocol {
    pipe_name: String,
    stream: Option<BufWriter<File>>,
    formatter: BinaryFormatter,
}

impl PipeProtocol {
    pub fn new() -> PipeProtocol {
        PipeProtocol {
            pipe_name: String::from(DEFAULT_PIPE_NAME),
            stream: None,
            formatter: BinaryFormatter::new(),
        }
    }

    fn pipe_path(&self) -> PathBuf {
        #[cfg(windows)]
        {
            PathBuf::from(format!(r"\\.\pipe\{}", self.pipe_name))
        }
        #[cfg(not(windows))]
        {
            PathBuf::from(&self.pipe_name)
        }
    }
}

impl Default for PipeProtocol {
    fn default() -> Self {
        PipeProtocol::new()
    }
}

impl ProtocolImpl for PipeProtocol {
    fn name(&self) -> &'static str {
        "pipe"
    }

    fn is_valid_option(&self, key: &str) -> bool {
        key == "pipename"
    }

    fn load_options(&mut self, options: &LookupTable) {
        self.pipe_name = options.get_string("pipename", DEFAULT_PIPE_NAME);
    }

    fn build_options(&self, builder: &mut ConnectionsBuilder) {
        builder.add_option("pipename", &self.pipe_name);
    }

    fn internal_connect(&mut self) -> Result<()> {
        let path = self.pipe_path();
        let file = OpenOptions::new().write(true).open(&path)?;
        debug!(path = %path.display(), "pipe opened");
        self.stream = Some(BufWriter::new(file));
        Ok(())
    }

    fn internal_write_packet(&mut self, packet: &Packet) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pipe is not open"))?;
        self.formatter.compile(packet);
        self.formatter.write(stream)?;
        stream.flush()?;
        Ok(())
    }

    fn internal_disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
        }
        Ok(())
    }

    fn carries_metadata(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{LogEntry, PacketKind};
    use silog_common::Level;
    use std::fs;

    #[test]
    fn test_default_pipe_name() {
        let protocol = PipeProtocol::new();
        assert_eq!(protocol.pipe_name, DEFAULT_PIPE_NAME);
    }

    #[test]
    fn test_load_options() {
        let mut table = LookupTable::new();
        table.put("pipename", "/tmp/si.pipe");
        let mut protocol = PipeProtocol::new();
        protocol.load_options(&table);
        assert_eq!(protocol.pipe_name, "/tmp/si.pipe");
    }

    #[test]
    fn test_missing_pipe_is_a_transport_error() {
        let mut table = LookupTable::new();
        table.put("pipename", "/nonexistent/path/si.pipe");
        let mut protocol = PipeProtocol::new();
        protocol.load_options(&table);
        assert!(protocol.internal_connect().is_err());
    }

    // A regular file stands in for the pipe: both are write-only byte
    // streams from the protocol's point of view.
    #[test]
    fn test_writes_framed_packets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("si.pipe");
        fs::write(&path, b"").unwrap();

        let mut table = LookupTable::new();
        table.put("pipename", path.to_str().unwrap());
        let mut protocol = PipeProtocol::new();
        protocol.load_options(&table);
        protocol.internal_connect().unwrap();
        let packet = Packet::from(LogEntry::new(Level::Message, "through the pipe"));
        protocol.internal_write_packet(&packet).unwrap();
        protocol.internal_disconnect().unwrap();

        let content = fs::read(&path).unwrap();
        assert_eq!(content.len(), packet.size());
        assert_eq!(
            u32::from_le_bytes(content[..4].try_into().unwrap()),
            PacketKind::LogEntry.tag()
        );
    }
}
