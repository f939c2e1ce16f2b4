// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reference decoder for the binary packet framing, used to check that
//! whatever the pipeline writes can be read back intact.

// Not every integration suite uses the whole decoder surface.
#![allow(dead_code)]

use anyhow::{bail, ensure, Context};
use silog::{
    Color, ControlCommand, Level, LogEntry, LogHeader, Packet, PacketKind, ProcessFlow, Watch,
};

pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        ensure!(self.data.len() >= n, "unexpected end of stream");
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn u32(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into()?))
    }

    fn i32(&mut self) -> anyhow::Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into()?))
    }

    fn u64(&mut self) -> anyhow::Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into()?))
    }

    fn level(&mut self) -> anyhow::Result<Level> {
        let tag = self.u32()?;
        Level::from_tag(tag).with_context(|| format!("bad level tag {tag}"))
    }

    fn blob(&mut self) -> anyhow::Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> anyhow::Result<String> {
        Ok(String::from_utf8(self.blob()?)?)
    }
}

pub fn decode_packet(reader: &mut Reader<'_>) -> anyhow::Result<Packet> {
    let kind_tag = reader.u32()?;
    let kind = PacketKind::from_tag(kind_tag)
        .with_context(|| format!("unknown packet kind {kind_tag}"))?;
    let payload_len = reader.u32()? as usize;
    let payload = reader.take(payload_len)?;
    let mut reader = Reader::new(payload);

    let packet = match kind {
        PacketKind::LogEntry => {
            let viewer_id = reader.i32()?;
            let level = reader.level()?;
            let color = Color::from(reader.u32()?);
            let timestamp = reader.u64()?;
            let process_id = reader.u32()?;
            let thread_id = reader.u32()?;
            Packet::LogEntry(LogEntry {
                viewer_id,
                level,
                color,
                timestamp,
                process_id,
                thread_id,
                session_name: reader.string()?,
                title: reader.string()?,
                hostname: reader.string()?,
                appname: reader.string()?,
                data: reader.blob()?,
            })
        }
        PacketKind::ControlCommand => Packet::ControlCommand(ControlCommand {
            command_type: reader.i32()?,
            data: reader.blob()?,
        }),
        PacketKind::Watch => {
            let watch_type = reader.i32()?;
            let level = reader.level()?;
            let timestamp = reader.u64()?;
            Packet::Watch(Watch {
                watch_type,
                level,
                timestamp,
                name: reader.string()?,
                value: reader.string()?,
            })
        }
        PacketKind::ProcessFlow => {
            let flow_type = reader.i32()?;
            let level = reader.level()?;
            let timestamp = reader.u64()?;
            let process_id = reader.u32()?;
            let thread_id = reader.u32()?;
            Packet::ProcessFlow(ProcessFlow {
                flow_type,
                level,
                timestamp,
                process_id,
                thread_id,
                title: reader.string()?,
                hostname: reader.string()?,
            })
        }
        PacketKind::LogHeader => {
            let content = reader.string()?;
            let mut hostname = None;
            let mut appname = None;
            for line in content.split("\r\n").filter(|l| !l.is_empty()) {
                match line.split_once('=') {
                    Some(("hostname", value)) => hostname = Some(value.to_owned()),
                    Some(("appname", value)) => appname = Some(value.to_owned()),
                    _ => bail!("unexpected log header line {line:?}"),
                }
            }
            Packet::LogHeader(LogHeader::new(
                hostname.context("log header without hostname")?,
                appname.context("log header without appname")?,
            ))
        }
    };
    ensure!(reader.is_empty(), "trailing payload bytes");
    Ok(packet)
}

/// Decodes a whole packet stream, without any file magic.
pub fn decode_stream(data: &[u8]) -> anyhow::Result<Vec<Packet>> {
    let mut reader = Reader::new(data);
    let mut packets = Vec::new();
    while !reader.is_empty() {
        packets.push(decode_packet(&mut reader)?);
    }
    Ok(packets)
}

/// Decodes a plain `SILF` log file.
pub fn decode_log_file(content: &[u8]) -> anyhow::Result<Vec<Packet>> {
    ensure!(content.len() >= 4, "file too short");
    ensure!(&content[..4] == b"SILF", "bad file magic");
    decode_stream(&content[4..])
}
