// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP console protocol.
//!
//! Connects to a console, exchanges the banner handshake and then sends
//! one framed packet per write, waiting for the console's two-byte
//! acknowledgement. A short acknowledgement means the connection is dead.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use silog_common::LookupTable;
use tracing::debug;

use crate::connections::ConnectionsBuilder;
use crate::formatter::{BinaryFormatter, Formatter};
use crate::packet::Packet;
use crate::protocol::ProtocolImpl;
use crate::Result;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4228;
const DEFAULT_TIMEOUT_MS: i64 = 30_000;
const ACK_SIZE: usize = 2;

/// Client banner answered to the console's greeting. The version tracks
/// the crate; consoles only require the terminating newline.
fn client_banner() -> String {
    format!(
        "SmartInspect Java Library v{}\n",
        env!("CARGO_PKG_VERSION")
    )
}

pub struct TcpProtocol {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    formatter: BinaryFormatter,
}

impl TcpProtocol {
    pub fn new() -> TcpProtocol {
        TcpProtocol {
            host: String::from(DEFAULT_HOST),
            port: DEFAULT_PORT,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS as u64),
            stream: None,
            formatter: BinaryFormatter::new(),
        }
    }

    fn open_stream(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve {}:{}", self.host, self.port),
            )
        }))
    }

    /// Reads the console's banner: bytes up to and including a line feed.
    fn read_server_banner(stream: &mut TcpStream) -> io::Result<String> {
        let mut banner = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let read = stream.read(&mut byte)?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed while reading the server banner",
                ));
            }
            if byte[0] == b'\n' {
                return Ok(String::from_utf8_lossy(&banner).into_owned());
            }
            banner.push(byte[0]);
        }
    }
}

impl Default for TcpProtocol {
    fn default() -> Self {
        TcpProtocol::new()
    }
}

impl ProtocolImpl for TcpProtocol {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn is_valid_option(&self, key: &str) -> bool {
        matches!(key, "host" | "port" | "timeout")
    }

    fn load_options(&mut self, options: &LookupTable) {
        self.host = options.get_string("host", DEFAULT_HOST);
        self.port = options.get_int("port", DEFAULT_PORT as i32).clamp(0, u16::MAX as i32) as u16;
        self.timeout =
            Duration::from_millis(options.get_long("timeout", DEFAULT_TIMEOUT_MS).max(0) as u64);
    }

    fn build_options(&self, builder: &mut ConnectionsBuilder) {
        builder.add_option("host", &self.host);
        builder.add_option("port", self.port);
        builder.add_option("timeout", self.timeout.as_millis());
    }

    fn internal_connect(&mut self) -> Result<()> {
        let mut stream = self.open_stream()?;
        let banner = Self::read_server_banner(&mut stream)?;
        debug!(host = %self.host, port = self.port, %banner, "console connected");
        stream.write_all(client_banner().as_bytes())?;
        stream.flush()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn internal_write_packet(&mut self, packet: &Packet) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not open"))?;
        self.formatter.compile(packet);
        self.formatter.write(stream)?;
        stream.flush()?;

        let mut ack = [0u8; ACK_SIZE];
        stream.read_exact(&mut ack).map_err(|_| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "console did not acknowledge the packet",
            )
        })?;
        Ok(())
    }

    fn internal_disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }

    fn carries_metadata(&self) -> bool {
        true
    }
}
