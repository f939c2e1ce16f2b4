// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Protocol engine.
//!
//! A protocol couples a transport-specific implementation
//! ([`ProtocolImpl`]) with the reusable outer machinery: option loading,
//! synchronous vs. asynchronous dispatch, lazy reconnects, the backlog
//! ring and the error event. Transport errors in synchronous mode surface
//! to the caller; asynchronous mode reports them only through the error
//! listeners.

pub mod file;
pub mod memory;
pub mod pipe;
pub mod tcp;
pub mod text;

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use silog_common::{Level, LookupTable};
use tracing::{debug, error};

use crate::connections::ConnectionsBuilder;
use crate::error::{QueueFailure, SilogError};
use crate::packet::{LogHeader, Packet};
use crate::scheduler::{CommandSink, Scheduler, SchedulerCommand};
use crate::Result;

/// Option keys understood by every protocol.
const BASE_OPTIONS: &[&str] = &[
    "level",
    "caption",
    "reconnect",
    "reconnect.interval",
    "keepopen",
    "backlog.enabled",
    "backlog.queue",
    "backlog.flushon",
    "backlog.keepopen",
    "async.enabled",
    "async.queue",
    "async.throttle",
    "async.clearondisconnect",
];

/// Payload of a custom dispatch command.
pub enum CommandPayload {
    None,
    /// A sink for protocols that can drain their buffered content, such as
    /// the in-memory protocol.
    Writer(Box<dyn Write + Send>),
}

impl fmt::Debug for CommandPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandPayload::None => write!(f, "None"),
            CommandPayload::Writer(_) => write!(f, "Writer(..)"),
        }
    }
}

/// A custom command routed to one protocol via dispatch-by-caption.
#[derive(Debug)]
pub struct ProtocolCommand {
    pub action: i32,
    pub payload: CommandPayload,
}

impl ProtocolCommand {
    pub fn new(action: i32) -> ProtocolCommand {
        ProtocolCommand {
            action,
            payload: CommandPayload::None,
        }
    }

    pub fn with_writer(action: i32, writer: Box<dyn Write + Send>) -> ProtocolCommand {
        ProtocolCommand {
            action,
            payload: CommandPayload::Writer(writer),
        }
    }
}

/// Transport-specific capability set behind the protocol engine.
pub trait ProtocolImpl: Send + 'static {
    /// Protocol name as used in connections strings.
    fn name(&self) -> &'static str;

    /// Whether this protocol recognizes the given option key. Base options
    /// are validated by the engine itself.
    fn is_valid_option(&self, key: &str) -> bool;

    /// Reads the protocol-specific options. Semantic validation that can
    /// only fail at runtime, such as key length checks, happens during
    /// [`internal_connect`](Self::internal_connect).
    fn load_options(&mut self, options: &LookupTable);

    /// Renders the protocol-specific options back into builder syntax.
    fn build_options(&self, builder: &mut ConnectionsBuilder);

    fn internal_connect(&mut self) -> Result<()>;

    fn internal_write_packet(&mut self, packet: &Packet) -> Result<()>;

    fn internal_disconnect(&mut self) -> Result<()>;

    fn internal_dispatch(&mut self, _command: &mut ProtocolCommand) -> Result<()> {
        Ok(())
    }

    /// Whether a log-header packet is emitted after a successful connect.
    fn carries_metadata(&self) -> bool {
        false
    }
}

/// Creates the implementation registered under a protocol name.
pub(crate) fn create_impl(name: &str) -> Option<Box<dyn ProtocolImpl>> {
    Some(match name {
        "file" => Box::new(file::FileProtocol::new()),
        "text" => Box::new(text::TextProtocol::new()),
        "tcp" => Box::new(tcp::TcpProtocol::new()),
        "pipe" => Box::new(pipe::PipeProtocol::new()),
        "mem" => Box::new(memory::MemoryProtocol::new()),
        _ => return None,
    })
}

/// Error listeners fired outside of every protocol and scheduler lock.
pub type ErrorListener = Arc<dyn Fn(&SilogError) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Mutex<Vec<ErrorListener>>,
}

impl ListenerSet {
    pub fn add(&self, listener: ErrorListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn clear(&self) {
        self.listeners.lock().unwrap().clear();
    }

    pub fn notify(&self, err: &SilogError) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(err);
        }
    }
}

#[derive(Debug, Clone)]
struct BaseOptions {
    level: Level,
    caption: String,
    reconnect: bool,
    reconnect_interval: Duration,
    keep_open: bool,
    backlog_enabled: bool,
    backlog_queue: usize,
    backlog_flushon: Level,
    async_enabled: bool,
    async_queue: usize,
    async_throttle: bool,
    async_clear_on_disconnect: bool,
}

impl BaseOptions {
    fn load(name: &str, table: &LookupTable) -> BaseOptions {
        let backlog_enabled = table.get_bool("backlog.enabled", false);
        BaseOptions {
            level: table.get_level("level", Level::Debug),
            caption: table.get_string("caption", name),
            reconnect: table.get_bool("reconnect", false),
            reconnect_interval: Duration::from_millis(
                table.get_timespan("reconnect.interval", 0).max(0) as u64,
            ),
            // With a backlog, the connection is only held open on request;
            // without one, sinks stay open unless told otherwise.
            keep_open: if backlog_enabled {
                table.get_bool("backlog.keepopen", false)
            } else {
                table.get_bool("keepopen", true)
            },
            backlog_enabled,
            backlog_queue: table.get_size("backlog.queue", 2048).max(0) as usize,
            backlog_flushon: table.get_level("backlog.flushon", Level::Error),
            async_enabled: table.get_bool("async.enabled", false),
            async_queue: table.get_size("async.queue", 2048).max(0) as usize,
            async_throttle: table.get_bool("async.throttle", true),
            async_clear_on_disconnect: table.get_bool("async.clearondisconnect", false),
        }
    }

    fn build(&self, builder: &mut ConnectionsBuilder) {
        builder.add_option("level", self.level);
        builder.add_option("caption", &self.caption);
        if self.reconnect {
            builder.add_option("reconnect", true);
            builder.add_option(
                "reconnect.interval",
                format!("{}s", self.reconnect_interval.as_secs()),
            );
        }
        if self.backlog_enabled {
            builder.add_option("backlog.enabled", true);
            builder.add_option("backlog.flushon", self.backlog_flushon);
            builder.add_option("backlog.keepopen", self.keep_open);
        }
        if self.async_enabled {
            builder.add_option("async.enabled", true);
            builder.add_option("async.throttle", self.async_throttle);
        }
    }
}

/// Ring buffer of packets retained while a backlog-enabled protocol is
/// connected. Exceeding the byte budget silently drops the oldest packets.
#[derive(Debug, Default)]
struct PacketRing {
    items: VecDeque<Arc<Packet>>,
    size: usize,
    max: usize,
}

impl PacketRing {
    fn new(max: usize) -> PacketRing {
        PacketRing {
            items: VecDeque::new(),
            size: 0,
            max,
        }
    }

    fn push(&mut self, packet: Arc<Packet>) {
        self.size += packet.size();
        self.items.push_back(packet);
        while self.size > self.max {
            if self.pop().is_none() {
                break;
            }
        }
    }

    fn pop(&mut self) -> Option<Arc<Packet>> {
        let packet = self.items.pop_front()?;
        self.size -= packet.size();
        Some(packet)
    }

    fn clear(&mut self) {
        self.items.clear();
        self.size = 0;
    }
}

struct ProtocolCore {
    imp: Box<dyn ProtocolImpl>,
    connected: bool,
    failed: bool,
    backlog: PacketRing,
    last_reconnect: Option<Instant>,
    hostname: String,
    appname: String,
}

impl ProtocolCore {
    fn establish(&mut self) -> Result<()> {
        self.imp.internal_connect()?;
        self.connected = true;
        self.failed = false;
        if self.imp.carries_metadata() {
            let header = Packet::LogHeader(LogHeader::new(
                self.hostname.clone(),
                self.appname.clone(),
            ));
            self.imp.internal_write_packet(&header)?;
        }
        Ok(())
    }

    fn connect(&mut self, opts: &BaseOptions) -> Result<()> {
        if self.connected || !opts.keep_open {
            // Sinks that are not kept open connect lazily per write.
            return Ok(());
        }
        self.establish()
    }

    fn write_packet(&mut self, opts: &BaseOptions, packet: &Arc<Packet>) -> Result<()> {
        if !self.connected && !opts.reconnect && opts.keep_open {
            // The connection is gone and we may not reestablish it.
            return Ok(());
        }
        if opts.backlog_enabled {
            let level = packet.level();
            if level >= opts.backlog_flushon && level != Level::Control {
                self.flush_backlog(opts)?;
            } else {
                self.backlog.push(Arc::clone(packet));
                return Ok(());
            }
        }
        self.forward(opts, packet, !opts.keep_open)
    }

    fn flush_backlog(&mut self, opts: &BaseOptions) -> Result<()> {
        // The connection stays open across the whole flush; the packet
        // that triggered it decides whether to close afterwards.
        while let Some(packet) = self.backlog.pop() {
            self.forward(opts, &packet, false)?;
        }
        Ok(())
    }

    fn forward(
        &mut self,
        opts: &BaseOptions,
        packet: &Arc<Packet>,
        disconnect_after: bool,
    ) -> Result<()> {
        if !self.connected {
            if !opts.keep_open {
                self.establish()?;
            } else {
                self.try_reconnect(opts);
            }
        }
        if self.connected {
            self.imp.internal_write_packet(packet)?;
            self.failed = false;
            if disconnect_after {
                self.connected = false;
                self.imp.internal_disconnect()?;
            }
        }
        Ok(())
    }

    /// Attempts to reestablish a lost connection, at most once per
    /// reconnect interval. Failures are swallowed; the packet that
    /// triggered the attempt is dropped either way if we stay offline.
    fn try_reconnect(&mut self, opts: &BaseOptions) {
        if !opts.reconnect {
            return;
        }
        if let Some(last) = self.last_reconnect {
            if last.elapsed() < opts.reconnect_interval {
                return;
            }
        }
        self.last_reconnect = Some(Instant::now());
        if self.establish().is_err() {
            self.failed = true;
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        self.backlog.clear();
        if self.connected {
            self.connected = false;
            self.imp.internal_disconnect()?;
        }
        Ok(())
    }

    /// Quiet teardown after a failure; the backlog survives for the next
    /// successful reconnect.
    fn teardown(&mut self) {
        if self.connected {
            self.connected = false;
            let _ = self.imp.internal_disconnect();
        }
    }
}

pub(crate) struct ProtocolShared {
    name: &'static str,
    options: BaseOptions,
    core: Mutex<ProtocolCore>,
    listeners: Arc<ListenerSet>,
}

impl ProtocolShared {
    fn perform(&self, command: SchedulerCommand) -> Result<()> {
        let mut core = self.core.lock().unwrap();
        let result = match command {
            SchedulerCommand::Connect => core.connect(&self.options),
            SchedulerCommand::WritePacket(packet) => {
                core.write_packet(&self.options, &packet)
            }
            SchedulerCommand::Disconnect => core.disconnect(),
            SchedulerCommand::Dispatch(mut custom) => core.imp.internal_dispatch(&mut custom),
        };
        if result.is_err() {
            core.failed = true;
            core.teardown();
        }
        result
    }
}

impl CommandSink for ProtocolShared {
    fn run_command(&self, command: SchedulerCommand) {
        if let Err(err) = self.perform(command) {
            error!(protocol = self.name, %err, "asynchronous protocol command failed");
            self.listeners.notify(&err);
        }
    }

    fn failed(&self) -> bool {
        self.core.lock().unwrap().failed
    }
}

/// A configured protocol endpoint: one sink, one formatter, one
/// error-recovery state machine and, in asynchronous mode, one worker.
pub struct Protocol {
    shared: Arc<ProtocolShared>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl Protocol {
    pub(crate) fn build(
        mut imp: Box<dyn ProtocolImpl>,
        options: &LookupTable,
        hostname: &str,
        appname: &str,
        listeners: Arc<ListenerSet>,
    ) -> Result<Protocol> {
        for key in options.keys() {
            if !BASE_OPTIONS.contains(&key) && !imp.is_valid_option(key) {
                return Err(SilogError::invalid_connections(format!(
                    "option {key:?} is not available for protocol {:?}",
                    imp.name()
                )));
            }
        }
        let base = BaseOptions::load(imp.name(), options);
        imp.load_options(options);

        let name = imp.name();
        let backlog = PacketRing::new(base.backlog_queue);
        let shared = Arc::new(ProtocolShared {
            name,
            options: base,
            core: Mutex::new(ProtocolCore {
                imp,
                connected: false,
                failed: false,
                backlog,
                last_reconnect: None,
                hostname: hostname.to_owned(),
                appname: appname.to_owned(),
            }),
            listeners,
        });
        let scheduler = if shared.options.async_enabled {
            Some(Scheduler::new(
                Arc::clone(&shared) as Arc<dyn CommandSink>,
                shared.options.async_queue,
                shared.options.async_throttle,
            ))
        } else {
            None
        };
        Ok(Protocol {
            shared,
            scheduler: Mutex::new(scheduler),
        })
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn caption(&self) -> &str {
        &self.shared.options.caption
    }

    pub fn is_asynchronous(&self) -> bool {
        self.shared.options.async_enabled
    }

    pub fn failed(&self) -> bool {
        self.shared.core.lock().unwrap().failed
    }

    /// Opens the connection, or starts the worker and queues the connect
    /// when asynchronous.
    pub fn connect(&self) -> Result<()> {
        debug!(protocol = %self, "connecting");
        if let Some(scheduler) = self.scheduler.lock().unwrap().as_mut() {
            scheduler.start();
        }
        self.execute(SchedulerCommand::Connect)
    }

    /// Closes the connection and drops any backlog.
    pub fn disconnect(&self) -> Result<()> {
        if self.shared.options.async_clear_on_disconnect {
            if let Some(scheduler) = self.scheduler.lock().unwrap().as_ref() {
                scheduler.clear();
            }
        }
        self.execute(SchedulerCommand::Disconnect)
    }

    /// Hands one packet to the protocol. Packets below the configured
    /// level are dropped; control commands always pass.
    pub fn write_packet(&self, packet: Arc<Packet>) -> Result<()> {
        let level = packet.level();
        if level != Level::Control && level < self.shared.options.level {
            return Ok(());
        }
        self.execute(SchedulerCommand::WritePacket(packet))
    }

    /// Routes a custom command to the transport implementation.
    pub fn dispatch(&self, command: ProtocolCommand) -> Result<()> {
        self.execute(SchedulerCommand::Dispatch(command))
    }

    /// Disconnects and, in asynchronous mode, drains and joins the worker.
    pub fn dispose(&self) -> Result<()> {
        let result = self.disconnect();
        if let Some(mut scheduler) = self.scheduler.lock().unwrap().take() {
            scheduler.stop();
        }
        result
    }

    fn execute(&self, command: SchedulerCommand) -> Result<()> {
        {
            let mut guard = self.scheduler.lock().unwrap();
            if let Some(scheduler) = guard.as_mut() {
                let size = command.size();
                let accepted = scheduler.schedule(command);
                let threshold = scheduler.threshold();
                drop(guard);
                if !accepted {
                    let kind = if size > threshold {
                        QueueFailure::Oversized
                    } else {
                        QueueFailure::Stopped
                    };
                    self.shared.listeners.notify(&SilogError::Queue(kind));
                }
                // Asynchronous submission never surfaces errors directly.
                return Ok(());
            }
        }
        let result = self.shared.perform(command);
        if let Err(ref err) = result {
            self.shared.listeners.notify(err);
        }
        result
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = ConnectionsBuilder::new();
        builder.begin_protocol(self.shared.name);
        self.shared.options.build(&mut builder);
        self.shared.core.lock().unwrap().imp.build_options(&mut builder);
        builder.end_protocol();
        write!(f, "{}", builder.as_str())
    }
}

impl Drop for Protocol {
    fn drop(&mut self) {
        if let Some(mut scheduler) = self.scheduler.lock().unwrap().take() {
            scheduler.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{ControlCommand, ControlCommandType, LogEntry};
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct MockState {
        log: Mutex<Vec<String>>,
        fail_connect: AtomicBool,
        fail_write: AtomicBool,
    }

    struct MockImpl {
        state: Arc<MockState>,
        metadata: bool,
    }

    impl MockImpl {
        fn protocol(options: &LookupTable) -> (Protocol, Arc<MockState>) {
            Self::protocol_with_metadata(options, false)
        }

        fn protocol_with_metadata(
            options: &LookupTable,
            metadata: bool,
        ) -> (Protocol, Arc<MockState>) {
            let state = Arc::new(MockState::default());
            let imp = Box::new(MockImpl {
                state: Arc::clone(&state),
                metadata,
            });
            let protocol = Protocol::build(
                imp,
                options,
                "testhost",
                "testapp",
                Arc::new(ListenerSet::default()),
            )
            .unwrap();
            (protocol, state)
        }
    }

    impl ProtocolImpl for MockImpl {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn is_valid_option(&self, key: &str) -> bool {
            key == "mockoption"
        }

        fn load_options(&mut self, _options: &LookupTable) {}

        fn build_options(&self, _builder: &mut ConnectionsBuilder) {}

        fn internal_connect(&mut self) -> Result<()> {
            if self.state.fail_connect.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
            }
            self.state.log.lock().unwrap().push(String::from("connect"));
            Ok(())
        }

        fn internal_write_packet(&mut self, packet: &Packet) -> Result<()> {
            if self.state.fail_write.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken").into());
            }
            let tag = match packet {
                Packet::LogEntry(entry) => format!("write:{}", entry.title),
                Packet::LogHeader(header) => format!("header:{}", header.hostname),
                other => format!("write:{:?}", other.kind()),
            };
            self.state.log.lock().unwrap().push(tag);
            Ok(())
        }

        fn internal_disconnect(&mut self) -> Result<()> {
            self.state
                .log
                .lock()
                .unwrap()
                .push(String::from("disconnect"));
            Ok(())
        }

        fn carries_metadata(&self) -> bool {
            self.metadata
        }
    }

    fn entry(title: &str, level: Level) -> Arc<Packet> {
        Arc::new(Packet::from(LogEntry::new(level, title)))
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let mut options = LookupTable::new();
        options.put("bogus", "1");
        let state = Arc::new(MockState::default());
        let imp = Box::new(MockImpl {
            state,
            metadata: false,
        });
        let result = Protocol::build(imp, &options, "h", "a", Arc::new(ListenerSet::default()));
        assert!(matches!(result, Err(SilogError::InvalidConnections(_))));
    }

    #[test]
    fn test_base_and_impl_options_are_accepted() {
        let mut options = LookupTable::new();
        options.put("level", "warning");
        options.put("caption", "primary");
        options.put("mockoption", "x");
        let (protocol, _) = MockImpl::protocol(&options);
        assert_eq!(protocol.caption(), "primary");
        assert!(!protocol.is_asynchronous());
    }

    #[test]
    fn test_level_filtering() {
        let mut options = LookupTable::new();
        options.put("level", "warning");
        let (protocol, state) = MockImpl::protocol(&options);
        protocol.connect().unwrap();
        protocol.write_packet(entry("low", Level::Message)).unwrap();
        protocol.write_packet(entry("high", Level::Error)).unwrap();
        protocol
            .write_packet(Arc::new(Packet::from(ControlCommand::new(
                ControlCommandType::ClearLog,
            ))))
            .unwrap();
        let log = state.log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["connect", "write:high", "write:ControlCommand"]
        );
    }

    #[test]
    fn test_metadata_header_follows_connect() {
        let options = LookupTable::new();
        let (protocol, state) = MockImpl::protocol_with_metadata(&options, true);
        protocol.connect().unwrap();
        let log = state.log.lock().unwrap().clone();
        assert_eq!(log, vec!["connect", "header:testhost"]);
    }

    #[test]
    fn test_sync_write_failure_propagates_and_notifies() {
        let options = LookupTable::new();
        let state = Arc::new(MockState::default());
        let imp = Box::new(MockImpl {
            state: Arc::clone(&state),
            metadata: false,
        });
        let listeners = Arc::new(ListenerSet::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            listeners.add(Arc::new(move |err: &SilogError| {
                seen.lock().unwrap().push(err.to_string());
            }));
        }
        let protocol =
            Protocol::build(imp, &options, "h", "a", Arc::clone(&listeners)).unwrap();
        protocol.connect().unwrap();

        state.fail_write.store(true, Ordering::SeqCst);
        let result = protocol.write_packet(entry("boom", Level::Message));
        assert!(matches!(result, Err(SilogError::Transport(_))));
        assert!(protocol.failed());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_reconnect_is_lazy_and_writes_after_recovery() {
        let mut options = LookupTable::new();
        options.put("reconnect", "true");
        let (protocol, state) = MockImpl::protocol(&options);
        protocol.connect().unwrap();

        state.fail_write.store(true, Ordering::SeqCst);
        assert!(protocol.write_packet(entry("lost", Level::Message)).is_err());
        assert!(protocol.failed());

        // The transport works again; the next write reconnects first.
        state.fail_write.store(false, Ordering::SeqCst);
        protocol.write_packet(entry("back", Level::Message)).unwrap();
        assert!(!protocol.failed());
        let log = state.log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["connect", "disconnect", "connect", "write:back"]
        );
    }

    #[test]
    fn test_backlog_flushes_in_order_on_trigger() {
        let mut options = LookupTable::new();
        options.put("backlog.enabled", "true");
        options.put("backlog.queue", "64KB");
        options.put("backlog.flushon", "error");
        options.put("backlog.keepopen", "true");
        let (protocol, state) = MockImpl::protocol(&options);
        protocol.connect().unwrap();

        protocol.write_packet(entry("one", Level::Message)).unwrap();
        protocol.write_packet(entry("two", Level::Message)).unwrap();
        assert!(state.log.lock().unwrap().iter().all(|l| l == "connect"));

        protocol.write_packet(entry("bad", Level::Error)).unwrap();
        let log = state.log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["connect", "write:one", "write:two", "write:bad"]
        );
    }

    #[test]
    fn test_backlog_ring_drops_oldest() {
        let mut ring = PacketRing::new(150);
        let a = entry("a", Level::Message);
        let size = a.size();
        ring.push(a);
        ring.push(entry("b", Level::Message));
        ring.push(entry("c", Level::Message));
        assert!(ring.size <= 150);
        // Two packets of ~61 bytes fit, the oldest was dropped.
        assert_eq!(ring.items.len(), 150 / size.max(1));
        let first = ring.pop().unwrap();
        match first.as_ref() {
            Packet::LogEntry(e) => assert_eq!(e.title, "b"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_keepopen_false_connects_per_packet() {
        let mut options = LookupTable::new();
        options.put("keepopen", "false");
        let (protocol, state) = MockImpl::protocol(&options);
        protocol.connect().unwrap();
        assert!(state.log.lock().unwrap().is_empty());

        protocol.write_packet(entry("a", Level::Message)).unwrap();
        let log = state.log.lock().unwrap().clone();
        assert_eq!(log, vec!["connect", "write:a", "disconnect"]);
    }

    #[test]
    fn test_async_packets_reach_the_impl() {
        let mut options = LookupTable::new();
        options.put("async.enabled", "true");
        let (protocol, state) = MockImpl::protocol(&options);
        protocol.connect().unwrap();
        for title in ["a", "b", "c"] {
            protocol.write_packet(entry(title, Level::Message)).unwrap();
        }
        protocol.dispose().unwrap();
        let log = state.log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["connect", "write:a", "write:b", "write:c", "disconnect"]
        );
    }

    #[test]
    fn test_async_failures_fire_the_error_event() {
        let mut options = LookupTable::new();
        options.put("async.enabled", "true");
        let state = Arc::new(MockState::default());
        let imp = Box::new(MockImpl {
            state: Arc::clone(&state),
            metadata: false,
        });
        let listeners = Arc::new(ListenerSet::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            listeners.add(Arc::new(move |err: &SilogError| {
                seen.lock().unwrap().push(err.to_string());
            }));
        }
        let protocol = Protocol::build(imp, &options, "h", "a", listeners).unwrap();
        state.fail_connect.store(true, Ordering::SeqCst);
        protocol.connect().unwrap();
        protocol.dispose().unwrap();
        assert!(!seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_display_renders_connections_syntax() {
        let mut options = LookupTable::new();
        options.put("caption", "main");
        let (protocol, _) = MockImpl::protocol(&options);
        let rendered = protocol.to_string();
        assert!(rendered.starts_with("mock("));
        assert!(rendered.contains("caption=main"));
    }
}
