// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The exporter façade.
//!
//! A [`LogExporter`] owns the protocols named in its connections string
//! and fans submitted packets out to each of them. It is constructed
//! explicitly by the caller; there is no process-wide instance. Errors
//! from synchronous protocols surface to the caller *and* reach the
//! registered error listeners; asynchronous protocols report through the
//! listeners alone.

use std::sync::{Arc, Mutex};

use silog_common::{Level, ProtocolVariables};
use tracing::debug;

use crate::connections;
use crate::error::SilogError;
use crate::packet::Packet;
use crate::protocol::{self, ListenerSet, Protocol, ProtocolCommand};
use crate::Result;

struct ExporterState {
    enabled: bool,
    level: Level,
    connections: String,
    protocols: Vec<Arc<Protocol>>,
}

pub struct LogExporter {
    appname: String,
    hostname: String,
    variables: ProtocolVariables,
    listeners: Arc<ListenerSet>,
    state: Mutex<ExporterState>,
}

impl LogExporter {
    pub fn new(appname: impl Into<String>) -> LogExporter {
        LogExporter {
            appname: appname.into(),
            hostname: sys_info::hostname().unwrap_or_default(),
            variables: ProtocolVariables::new(),
            listeners: Arc::new(ListenerSet::default()),
            state: Mutex::new(ExporterState {
                enabled: false,
                level: Level::Debug,
                connections: String::new(),
                protocols: Vec::new(),
            }),
        }
    }

    pub fn appname(&self) -> &str {
        &self.appname
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn level(&self) -> Level {
        self.state.lock().unwrap().level
    }

    pub fn set_level(&self, level: Level) {
        self.state.lock().unwrap().level = level;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    pub fn connections(&self) -> String {
        self.state.lock().unwrap().connections.clone()
    }

    /// Registers an error listener. Listeners run on whichever thread hit
    /// the failure, including protocol worker threads, and may safely log
    /// back into the exporter.
    pub fn on_error(&self, listener: impl Fn(&SilogError) + Send + Sync + 'static) {
        self.listeners.add(Arc::new(listener));
    }

    pub fn set_variable(&self, name: &str, value: impl Into<String>) {
        self.variables.put(name, value);
    }

    pub fn unset_variable(&self, name: &str) {
        self.variables.remove(name);
    }

    pub fn variable(&self, name: &str) -> Option<String> {
        self.variables.get(name)
    }

    /// Replaces the protocol set from a connections string.
    ///
    /// Syntax errors, unknown protocols and unknown options are returned
    /// to the caller and leave the previous configuration untouched. When
    /// the exporter is enabled, the old protocols are torn down and the
    /// new ones connected; transport failures in that phase are reported
    /// through the error listeners.
    pub fn set_connections(&self, connections: &str) -> Result<()> {
        let protocols = self.build_protocols(connections)?;
        debug!(connections, protocols = protocols.len(), "connections applied");
        let (old, reconnect) = {
            let mut state = self.state.lock().unwrap();
            let old = std::mem::replace(&mut state.protocols, protocols.clone());
            state.connections = connections.to_owned();
            (old, state.enabled)
        };
        for protocol in old {
            let _ = protocol.dispose();
        }
        if reconnect {
            for protocol in &protocols {
                let _ = protocol.connect();
            }
        }
        Ok(())
    }

    /// Enables or disables the pipeline, connecting or disconnecting every
    /// protocol. The first synchronous failure is returned; all failures
    /// reach the error listeners either way.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let protocols = {
            let mut state = self.state.lock().unwrap();
            if state.enabled == enabled {
                return Ok(());
            }
            state.enabled = enabled;
            state.protocols.clone()
        };
        let mut first_failure = None;
        for protocol in protocols {
            let result = if enabled {
                protocol.connect()
            } else {
                protocol.disconnect()
            };
            if let Err(err) = result {
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Hands one packet to every configured protocol. Packets below the
    /// exporter level are dropped before fan-out; control commands always
    /// pass. Missing host and application names are stamped in.
    pub fn write_packet(&self, mut packet: Packet) -> Result<()> {
        let protocols = {
            let state = self.state.lock().unwrap();
            if !state.enabled {
                return Ok(());
            }
            let level = packet.level();
            if level != Level::Control && level < state.level {
                return Ok(());
            }
            state.protocols.clone()
        };
        self.stamp(&mut packet);
        let packet = Arc::new(packet);
        let mut first_failure = None;
        for protocol in protocols {
            if let Err(err) = protocol.write_packet(Arc::clone(&packet)) {
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Routes a custom command to the protocol with the given caption.
    pub fn dispatch(&self, caption: &str, command: ProtocolCommand) -> Result<()> {
        let target = {
            let state = self.state.lock().unwrap();
            state
                .protocols
                .iter()
                .find(|p| p.caption().eq_ignore_ascii_case(caption))
                .cloned()
        };
        match target {
            Some(protocol) => protocol.dispatch(command),
            None => Err(SilogError::Internal(format!(
                "no connection with caption {caption:?}"
            ))),
        }
    }

    /// Disables the exporter and releases every protocol and listener.
    pub fn dispose(&self) {
        let protocols = {
            let mut state = self.state.lock().unwrap();
            state.enabled = false;
            std::mem::take(&mut state.protocols)
        };
        for protocol in protocols {
            let _ = protocol.dispose();
        }
        self.listeners.clear();
    }

    fn stamp(&self, packet: &mut Packet) {
        match packet {
            Packet::LogEntry(entry) => {
                if entry.hostname.is_empty() {
                    entry.hostname = self.hostname.clone();
                }
                if entry.appname.is_empty() {
                    entry.appname = self.appname.clone();
                }
            }
            Packet::ProcessFlow(flow) => {
                if flow.hostname.is_empty() {
                    flow.hostname = self.hostname.clone();
                }
            }
            _ => {}
        }
    }

    fn build_protocols(&self, connections: &str) -> Result<Vec<Arc<Protocol>>> {
        let expanded = self.variables.expand(connections);
        let mut protocols = Vec::new();
        connections::parse(&expanded, |name, options| {
            let imp = protocol::create_impl(name).ok_or_else(|| {
                SilogError::invalid_connections(format!("unknown protocol {name:?}"))
            })?;
            let table = connections::parse_options_table(options)?;
            let built = Protocol::build(
                imp,
                &table,
                &self.hostname,
                &self.appname,
                Arc::clone(&self.listeners),
            )?;
            protocols.push(Arc::new(built));
            Ok(())
        })?;
        Ok(protocols)
    }
}

impl Drop for LogExporter {
    fn drop(&mut self) {
        self.dispose();
    }
}
