// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous command scheduling.
//!
//! Every asynchronous protocol owns one [`Scheduler`]: a bounded,
//! size-accounted FIFO of [`SchedulerCommand`]s drained by a single worker
//! thread. Producers either block until the queue has room (throttle mode)
//! or push out the oldest commands (overwrite mode).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::packet::Packet;
use crate::protocol::ProtocolCommand;

/// Accounted size of commands that do not carry a packet.
const COMMAND_SIZE: usize = 16;

/// Maximum number of commands the worker drains per monitor round.
const BATCH: usize = 16;

/// A unit of work queued for a protocol's worker thread.
#[derive(Debug)]
pub enum SchedulerCommand {
    Connect,
    WritePacket(Arc<Packet>),
    Disconnect,
    Dispatch(ProtocolCommand),
}

impl SchedulerCommand {
    /// Bytes this command accounts for against the queue threshold.
    pub fn size(&self) -> usize {
        match self {
            SchedulerCommand::WritePacket(packet) => packet.size(),
            _ => COMMAND_SIZE,
        }
    }
}

/// FIFO of pending commands with running byte accounting.
#[derive(Debug, Default)]
pub struct SchedulerQueue {
    items: VecDeque<SchedulerCommand>,
    size: usize,
}

impl SchedulerQueue {
    pub fn enqueue(&mut self, command: SchedulerCommand) {
        self.size += command.size();
        self.items.push_back(command);
    }

    pub fn dequeue(&mut self) -> Option<SchedulerCommand> {
        let command = self.items.pop_front()?;
        self.size -= command.size();
        Some(command)
    }

    /// Drops whole commands from the head until `needed` more bytes fit
    /// under `threshold` or the queue is empty.
    pub fn trim(&mut self, needed: usize, threshold: usize) {
        while self.size + needed > threshold && self.dequeue().is_some() {}
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.size = 0;
    }

    pub fn total_size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Executes scheduled commands on behalf of the worker thread.
pub(crate) trait CommandSink: Send + Sync + 'static {
    fn run_command(&self, command: SchedulerCommand);

    /// Whether the owning protocol is currently in the failed state.
    fn failed(&self) -> bool;
}

#[derive(Default)]
struct MonitorState {
    queue: SchedulerQueue,
    started: bool,
    stopped: bool,
}

struct Shared {
    state: Mutex<MonitorState>,
    signal: Condvar,
    threshold: usize,
    throttle: bool,
    sink: Arc<dyn CommandSink>,
}

/// Single-worker asynchronous executor with cooperative shutdown.
pub(crate) struct Scheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(sink: Arc<dyn CommandSink>, threshold: usize, throttle: bool) -> Scheduler {
        Scheduler {
            shared: Arc::new(Shared {
                state: Mutex::new(MonitorState::default()),
                signal: Condvar::new(),
                threshold,
                throttle,
                sink,
            }),
            worker: None,
        }
    }

    pub fn threshold(&self) -> usize {
        self.shared.threshold
    }

    /// Spawns the worker thread. Calling `start` twice is a no-op; once
    /// stopped, a scheduler stays stopped.
    pub fn start(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.started {
                return;
            }
            state.started = true;
        }
        let shared = Arc::clone(&self.shared);
        self.worker = Some(thread::spawn(move || worker_loop(&shared)));
    }

    /// Offers a command to the worker. Returns false when the scheduler is
    /// not running or the command can never fit under the threshold.
    ///
    /// In throttle mode the caller blocks until the queue has room, unless
    /// the protocol already failed, in which case older commands are
    /// dropped instead of delaying the producer further.
    pub fn schedule(&self, command: SchedulerCommand) -> bool {
        if command.size() > self.shared.threshold {
            return false;
        }
        let shared = &self.shared;
        let mut state = shared.state.lock().unwrap();
        if !state.started || state.stopped {
            return false;
        }
        if !shared.throttle || shared.sink.failed() {
            let (needed, threshold) = (command.size(), shared.threshold);
            state.queue.trim(needed, threshold);
        } else {
            while state.queue.total_size() + command.size() > shared.threshold {
                if state.stopped {
                    return false;
                }
                state = shared.signal.wait(state).unwrap();
            }
        }
        state.queue.enqueue(command);
        shared.signal.notify_all();
        true
    }

    /// Drops every queued command and wakes throttled producers.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.queue.clear();
        self.shared.signal.notify_all();
    }

    /// Signals the worker and waits for it to drain and exit.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.started || state.stopped {
                if self.worker.is_none() {
                    return;
                }
            }
            state.stopped = true;
        }
        self.shared.signal.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared) {
    let mut buffer: Vec<SchedulerCommand> = Vec::with_capacity(BATCH);
    loop {
        {
            let mut state = shared.state.lock().unwrap();
            while state.queue.is_empty() && !state.stopped {
                state = shared.signal.wait(state).unwrap();
            }
            if state.stopped && state.queue.is_empty() {
                return;
            }
            while buffer.len() < BATCH {
                match state.queue.dequeue() {
                    Some(command) => buffer.push(command),
                    None => break,
                }
            }
            shared.signal.notify_all();
        }
        for command in buffer.drain(..) {
            // Snapshot before running so a stop request observed mid-batch
            // still lets the current command finish.
            let stopping = shared.state.lock().unwrap().stopped;
            shared.sink.run_command(command);
            if stopping && shared.sink.failed() {
                // The sink is both asked to stop and unable to make
                // progress; drop the backlog for bounded shutdown latency.
                shared.state.lock().unwrap().queue.clear();
                return;
            }
        }
    }
}
