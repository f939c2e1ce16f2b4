// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed log packets.
//!
//! Packets are immutable once handed to the pipeline: the exporter wraps
//! them in an [`std::sync::Arc`] before fan-out, so asynchronous workers
//! serialize them without any per-packet locking.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::Utc;
use silog_common::{Color, Level};

/// Framed size of the length prefix carried by every string and blob.
const LENGTH_PREFIX: usize = 4;
/// Kind tag plus payload length.
const FRAME_HEADER: usize = 8;

/// Wire tag of a packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    ControlCommand,
    LogEntry,
    Watch,
    ProcessFlow,
    LogHeader,
}

impl PacketKind {
    pub fn tag(self) -> u32 {
        match self {
            PacketKind::ControlCommand => 1,
            PacketKind::LogEntry => 4,
            PacketKind::Watch => 5,
            PacketKind::ProcessFlow => 6,
            PacketKind::LogHeader => 7,
        }
    }

    pub fn from_tag(tag: u32) -> Option<PacketKind> {
        Some(match tag {
            1 => PacketKind::ControlCommand,
            4 => PacketKind::LogEntry,
            5 => PacketKind::Watch,
            6 => PacketKind::ProcessFlow,
            7 => PacketKind::LogHeader,
            _ => return None,
        })
    }
}

/// How a console viewer renders a log entry's data blob.
pub const VIEWER_NONE: i32 = -1;
pub const VIEWER_TITLE: i32 = 0;
pub const VIEWER_DATA: i32 = 1;

/// Type tag of a [`ControlCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommandType {
    ClearLog,
    ClearWatches,
    ClearAutoViews,
    ClearAll,
    ClearProcessFlow,
}

impl ControlCommandType {
    pub fn tag(self) -> i32 {
        match self {
            ControlCommandType::ClearLog => 0,
            ControlCommandType::ClearWatches => 1,
            ControlCommandType::ClearAutoViews => 2,
            ControlCommandType::ClearAll => 3,
            ControlCommandType::ClearProcessFlow => 4,
        }
    }
}

/// Type tag of a [`Watch`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchType {
    Char,
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    Object,
}

impl WatchType {
    pub fn tag(self) -> i32 {
        match self {
            WatchType::Char => 0,
            WatchType::String => 1,
            WatchType::Int => 2,
            WatchType::Float => 3,
            WatchType::Bool => 4,
            WatchType::Timestamp => 5,
            WatchType::Object => 6,
        }
    }
}

/// Type tag of a [`ProcessFlow`] marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessFlowType {
    EnterMethod,
    LeaveMethod,
    EnterThread,
    LeaveThread,
    EnterProcess,
    LeaveProcess,
}

impl ProcessFlowType {
    pub fn tag(self) -> i32 {
        match self {
            ProcessFlowType::EnterMethod => 0,
            ProcessFlowType::LeaveMethod => 1,
            ProcessFlowType::EnterThread => 2,
            ProcessFlowType::LeaveThread => 3,
            ProcessFlowType::EnterProcess => 4,
            ProcessFlowType::LeaveProcess => 5,
        }
    }

    pub fn is_enter(self) -> bool {
        matches!(
            self,
            ProcessFlowType::EnterMethod
                | ProcessFlowType::EnterThread
                | ProcessFlowType::EnterProcess
        )
    }
}

/// Microseconds since the Unix epoch, UTC.
pub fn now_micros() -> u64 {
    Utc::now().timestamp_micros().max(0) as u64
}

pub(crate) fn current_thread_id() -> u32 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as u32
}

/// A single log message with an optional data blob.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: Level,
    pub title: String,
    pub session_name: String,
    pub hostname: String,
    pub appname: String,
    pub viewer_id: i32,
    pub color: Color,
    pub timestamp: u64,
    pub process_id: u32,
    pub thread_id: u32,
    pub data: Vec<u8>,
}

impl LogEntry {
    pub fn new(level: Level, title: impl Into<String>) -> LogEntry {
        LogEntry {
            level,
            title: title.into(),
            session_name: String::from("Main"),
            hostname: String::new(),
            appname: String::new(),
            viewer_id: VIEWER_NONE,
            color: Color::TRANSPARENT,
            timestamp: now_micros(),
            process_id: std::process::id(),
            thread_id: current_thread_id(),
            data: Vec::new(),
        }
    }

    fn payload_size(&self) -> usize {
        28 + string_size(&self.session_name)
            + string_size(&self.title)
            + string_size(&self.hostname)
            + string_size(&self.appname)
            + LENGTH_PREFIX
            + self.data.len()
    }
}

/// An instruction to the receiving console, such as clearing the log.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCommand {
    pub command_type: i32,
    pub data: Vec<u8>,
}

impl ControlCommand {
    pub fn new(command_type: ControlCommandType) -> ControlCommand {
        ControlCommand {
            command_type: command_type.tag(),
            data: Vec::new(),
        }
    }

    fn payload_size(&self) -> usize {
        4 + LENGTH_PREFIX + self.data.len()
    }
}

/// A named value tracked by the console's watch panel.
#[derive(Debug, Clone, PartialEq)]
pub struct Watch {
    pub level: Level,
    pub name: String,
    pub value: String,
    pub watch_type: i32,
    pub timestamp: u64,
}

impl Watch {
    pub fn new(
        level: Level,
        name: impl Into<String>,
        value: impl Into<String>,
        watch_type: WatchType,
    ) -> Watch {
        Watch {
            level,
            name: name.into(),
            value: value.into(),
            watch_type: watch_type.tag(),
            timestamp: now_micros(),
        }
    }

    fn payload_size(&self) -> usize {
        16 + string_size(&self.name) + string_size(&self.value)
    }
}

/// An enter/leave marker for methods, threads and processes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessFlow {
    pub level: Level,
    pub flow_type: i32,
    pub title: String,
    pub hostname: String,
    pub timestamp: u64,
    pub process_id: u32,
    pub thread_id: u32,
}

impl ProcessFlow {
    pub fn new(level: Level, flow_type: ProcessFlowType, title: impl Into<String>) -> ProcessFlow {
        ProcessFlow {
            level,
            flow_type: flow_type.tag(),
            title: title.into(),
            hostname: String::new(),
            timestamp: now_micros(),
            process_id: std::process::id(),
            thread_id: current_thread_id(),
        }
    }

    fn payload_size(&self) -> usize {
        24 + string_size(&self.title) + string_size(&self.hostname)
    }
}

/// Connection metadata emitted by protocols that carry it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogHeader {
    pub hostname: String,
    pub appname: String,
}

impl LogHeader {
    pub fn new(hostname: impl Into<String>, appname: impl Into<String>) -> LogHeader {
        LogHeader {
            hostname: hostname.into(),
            appname: appname.into(),
        }
    }

    /// The key/value content transmitted on the wire.
    pub fn content(&self) -> String {
        format!("hostname={}\r\nappname={}\r\n", self.hostname, self.appname)
    }

    fn payload_size(&self) -> usize {
        string_size(&self.content())
    }
}

/// A typed log event flowing through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    LogEntry(LogEntry),
    ControlCommand(ControlCommand),
    Watch(Watch),
    ProcessFlow(ProcessFlow),
    LogHeader(LogHeader),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::LogEntry(_) => PacketKind::LogEntry,
            Packet::ControlCommand(_) => PacketKind::ControlCommand,
            Packet::Watch(_) => PacketKind::Watch,
            Packet::ProcessFlow(_) => PacketKind::ProcessFlow,
            Packet::LogHeader(_) => PacketKind::LogHeader,
        }
    }

    /// Severity used for protocol level filtering. Control commands always
    /// report [`Level::Control`] and bypass the filter.
    pub fn level(&self) -> Level {
        match self {
            Packet::LogEntry(e) => e.level,
            Packet::ControlCommand(_) => Level::Control,
            Packet::Watch(w) => w.level,
            Packet::ProcessFlow(p) => p.level,
            Packet::LogHeader(_) => Level::Message,
        }
    }

    /// Creation time in microseconds since the Unix epoch, for packet
    /// kinds that carry one.
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Packet::LogEntry(e) => Some(e.timestamp),
            Packet::Watch(w) => Some(w.timestamp),
            Packet::ProcessFlow(p) => Some(p.timestamp),
            Packet::ControlCommand(_) | Packet::LogHeader(_) => None,
        }
    }

    /// Exact framed size in bytes, used for scheduler queue accounting.
    pub fn size(&self) -> usize {
        FRAME_HEADER
            + match self {
                Packet::LogEntry(e) => e.payload_size(),
                Packet::ControlCommand(c) => c.payload_size(),
                Packet::Watch(w) => w.payload_size(),
                Packet::ProcessFlow(p) => p.payload_size(),
                Packet::LogHeader(h) => h.payload_size(),
            }
    }
}

impl From<LogEntry> for Packet {
    fn from(value: LogEntry) -> Self {
        Packet::LogEntry(value)
    }
}

impl From<ControlCommand> for Packet {
    fn from(value: ControlCommand) -> Self {
        Packet::ControlCommand(value)
    }
}

impl From<Watch> for Packet {
    fn from(value: Watch) -> Self {
        Packet::Watch(value)
    }
}

impl From<ProcessFlow> for Packet {
    fn from(value: ProcessFlow) -> Self {
        Packet::ProcessFlow(value)
    }
}

impl From<LogHeader> for Packet {
    fn from(value: LogHeader) -> Self {
        Packet::LogHeader(value)
    }
}

fn string_size(s: &str) -> usize {
    LENGTH_PREFIX + s.len()
}
