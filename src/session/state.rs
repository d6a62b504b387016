//! Observable session state and the event router.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, broadcast, watch};
use tracing::{debug, warn};

use crate::connection::ConnectionState;
use crate::dispatch::RunTracker;
use crate::errors::ProtocolError;
use crate::events::{EventKind, InboundEvent};
use crate::logbuf::{LogBuffer, LogEntry};
use crate::protocol::JointState;
use crate::telemetry::TelemetryStore;

/// Notification pushed to collaborators whenever observable state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(ConnectionState),
    Log(LogEntry),
    LogsCleared,
    /// Full telemetry snapshot after a merge.
    Telemetry(JointState),
    Running(bool),
    /// The service reported the end of a run (`execution_complete` or
    /// `error`). Published after the entry for that event.
    RunEnded,
}

/// Everything a collaborator can observe about a session.
#[derive(Debug, Default)]
pub struct SessionState {
    pub connection: ConnectionState,
    pub telemetry: TelemetryStore,
    pub logs: LogBuffer,
    pub runs: RunTracker,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new(max_attempts: u32, log_capacity: usize) -> Self {
        Self {
            connection: ConnectionState::disconnected(max_attempts),
            logs: LogBuffer::with_capacity(log_capacity),
            ..Self::default()
        }
    }

    /// Append a log entry and return its notification.
    pub fn record(&mut self, entry: LogEntry) -> SessionEvent {
        self.logs.append(entry.clone());
        SessionEvent::Log(entry)
    }

    pub fn set_connection(&mut self, state: ConnectionState) -> SessionEvent {
        self.connection = state.clone();
        SessionEvent::Status(state)
    }

    /// Route one inbound event to the store, the log and run bookkeeping.
    pub fn apply_event(&mut self, event: InboundEvent) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        match event.kind {
            EventKind::Stdout(text) => out.push(self.record(LogEntry::info(text))),
            EventKind::Stderr(text) => {
                if !text.trim().is_empty() {
                    out.push(self.record(LogEntry::error(text)));
                }
            }
            EventKind::Telemetry(update) => {
                let count = self.telemetry.merge(&update);
                out.push(self.record(LogEntry::info(format!("Joint update: {} joints", count))));
                out.push(SessionEvent::Telemetry(self.telemetry.snapshot()));
            }
            EventKind::RunStarted(text) => {
                if self.runs.on_started() {
                    out.push(SessionEvent::Running(true));
                }
                self.record_nonempty(LogEntry::info(text), &mut out);
            }
            EventKind::RunCompleted(text) => {
                if self.runs.on_completed() {
                    out.push(SessionEvent::Running(false));
                }
                self.record_nonempty(LogEntry::success(text), &mut out);
                out.push(SessionEvent::RunEnded);
            }
            EventKind::Error(text) => {
                if self.runs.on_completed() {
                    out.push(SessionEvent::Running(false));
                }
                if !text.is_empty() {
                    self.last_error = Some(text.clone());
                    out.push(self.record(LogEntry::error(text)));
                }
                out.push(SessionEvent::RunEnded);
            }
            EventKind::TestStarted(text) => self.record_nonempty(LogEntry::info(text), &mut out),
            EventKind::Confirmed(joints) => {
                debug!(joints = joints.len(), "service echoed joint confirmation");
            }
        }
        out
    }

    /// The streaming channel is gone, so lifecycle events for a run in
    /// progress will never arrive. Clears the running flag.
    pub fn release_run(&mut self) -> Option<SessionEvent> {
        self.runs
            .on_completed()
            .then_some(SessionEvent::Running(false))
    }

    /// Record a frame that could not be decoded. The session carries on.
    pub fn apply_protocol_error(&mut self, err: &ProtocolError) -> SessionEvent {
        match err {
            ProtocolError::UnknownType(kind) => {
                debug!(kind = %kind, "ignoring unknown message type");
                self.record(LogEntry::warning(format!("Unknown message type: {}", kind)))
            }
            ProtocolError::Malformed { reason, raw } => {
                warn!(reason = %reason, "failed to parse inbound frame");
                self.record(LogEntry::error(format!("Failed to parse message: {}", raw)))
            }
        }
    }

    fn record_nonempty(&mut self, entry: LogEntry, out: &mut Vec<SessionEvent>) {
        if !entry.message.is_empty() {
            out.push(self.record(entry));
        }
    }
}

/// Shared handle to the session state plus its notification channels.
///
/// Mutations go through [`Shared::update`]; notifications are published while
/// the write lock is held so subscribers see them in mutation order.
#[derive(Clone)]
pub struct Shared {
    state: Arc<RwLock<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    status: Arc<watch::Sender<ConnectionState>>,
}

const EVENT_CHANNEL_CAPACITY: usize = 1024;

impl Shared {
    pub fn new(state: SessionState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status, _) = watch::channel(state.connection.clone());
        Self {
            state: Arc::new(RwLock::new(state)),
            events,
            status: Arc::new(status),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().await
    }

    /// Mutate the state and publish the notifications `f` pushes.
    pub async fn update<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut SessionState, &mut Vec<SessionEvent>) -> R,
    {
        let mut state = self.state.write().await;
        let mut pending = Vec::new();
        let result = f(&mut state, &mut pending);
        for event in pending {
            if let SessionEvent::Status(ref connection) = event {
                self.status.send_replace(connection.clone());
            }
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        result
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }
}
