// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side structured logging pipeline.
//!
//! Applications build typed log [packets](packet::Packet) and hand them to a
//! [`LogExporter`], which fans them out to the protocols named in its
//! connections string — a TCP console, a named pipe, a rotating and
//! optionally encrypted binary log file, a plain-text file or an in-memory
//! ring buffer. Each protocol owns its connection, formatter and
//! error-recovery state, and can run synchronously on the caller's thread
//! or asynchronously behind a bounded, size-accounted scheduler queue.

pub mod connections;
pub mod error;
pub mod exporter;
pub mod formatter;
pub mod packet;
pub mod protocol;
pub mod rotater;
pub mod scheduler;

pub use error::{QueueFailure, SilogError};
pub use exporter::LogExporter;
pub use packet::{
    ControlCommand, ControlCommandType, LogEntry, LogHeader, Packet, PacketKind, ProcessFlow,
    ProcessFlowType, Watch, WatchType,
};
pub use protocol::{CommandPayload, Protocol, ProtocolCommand};
pub use rotater::RotateMode;
pub use silog_common::{Color, Level, LookupTable, ProtocolVariables};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SilogError>;
