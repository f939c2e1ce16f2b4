// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::io;

/// Why the asynchronous scheduler rejected a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFailure {
    /// The command is larger than the queue threshold and can never fit.
    Oversized,
    /// The scheduler has not been started or was already stopped.
    Stopped,
}

impl fmt::Display for QueueFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueFailure::Oversized => write!(f, "command exceeds the queue threshold"),
            QueueFailure::Stopped => write!(f, "scheduler is not running"),
        }
    }
}

/// Errors raised by the packet pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SilogError {
    /// Syntax error in the connections string, an unknown protocol, or an
    /// option the chosen protocol does not recognize.
    #[error("invalid connections: {0}")]
    InvalidConnections(String),
    /// Syntactically valid options that form an invalid combination, such
    /// as enabling encryption without a usable key.
    #[error("invalid protocol option: {0}")]
    ProtocolOption(String),
    /// I/O failure while connecting to, writing to or reading from a sink.
    #[error(transparent)]
    Transport(#[from] io::Error),
    /// A command was rejected by the asynchronous scheduler.
    #[error("scheduler rejected command: {0}")]
    Queue(QueueFailure),
    /// Caller-side misuse of the pipeline.
    #[error("{0}")]
    Internal(String),
}

impl SilogError {
    pub(crate) fn invalid_connections(msg: impl Into<String>) -> SilogError {
        SilogError::InvalidConnections(msg.into())
    }

    pub(crate) fn option(msg: impl Into<String>) -> SilogError {
        SilogError::ProtocolOption(msg.into())
    }
}
