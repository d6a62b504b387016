//! Connection driver task.
//!
//! One task per session owns the streaming connection and the
//! [`ConnectionMachine`]. It consumes inbound frames in arrival order, runs
//! the backoff timer and forwards outbound frames queued by the dispatcher.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::state::Shared;
use super::stop::StopSignal;
use crate::connection::{
    CloseReason, ConnectionMachine, ConnectionStatus, Directive, Frame, NORMAL_CLOSE,
    StreamConnection, StreamTransport,
};
use crate::events::parse_message;
use crate::logbuf::LogEntry;

/// Requests sent to the driver by the session façade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCommand {
    /// Send a text frame if connected; dropped otherwise.
    Send(String),
    /// Manual reconnect, clearing exhausted retries.
    Reconnect,
}

/// Next thing the driver loop does.
enum Step {
    Connect,
    Backoff(Duration),
    Idle,
    Stop,
}

pub(crate) struct Driver {
    transport: Arc<dyn StreamTransport>,
    url: String,
    machine: ConnectionMachine,
    shared: Shared,
    commands: mpsc::Receiver<DriverCommand>,
    stop: StopSignal,
}

impl Driver {
    pub(crate) fn new(
        transport: Arc<dyn StreamTransport>,
        url: String,
        machine: ConnectionMachine,
        shared: Shared,
        commands: mpsc::Receiver<DriverCommand>,
        stop: StopSignal,
    ) -> Self {
        Self {
            transport,
            url,
            machine,
            shared,
            commands,
            stop,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut step = self.begin().await;
        loop {
            step = match step {
                Step::Connect => self.open().await,
                Step::Backoff(delay) => self.wait_backoff(delay).await,
                Step::Idle => self.wait_idle().await,
                Step::Stop => break,
            };
        }
        self.machine.on_requested_close();
        self.sync(Vec::new()).await;
        debug!(url = %self.url, "session driver stopped");
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    async fn begin(&mut self) -> Step {
        match self.machine.begin_connect() {
            Ok(()) => {
                self.sync(Vec::new()).await;
                Step::Connect
            }
            Err(e) => {
                debug!(error = %e, "connect refused");
                Step::Idle
            }
        }
    }

    async fn open(&mut self) -> Step {
        debug!(url = %self.url, "connecting");
        let attempt = tokio::select! {
            _ = self.stop.stopped() => return Step::Stop,
            result = self.transport.connect(&self.url) => result,
        };

        match attempt {
            Ok(connection) => {
                self.machine.on_open();
                info!(url = %self.url, "connected to execution service");
                self.sync(vec![LogEntry::success("Connected to robot control server")])
                    .await;
                self.pump(connection).await
            }
            Err(e) => {
                warn!(error = %e, "connection attempt failed");
                let directive = self.machine.on_connect_failed();
                let entry = LogEntry::error(format!("WebSocket connection error: {}", e));
                self.after_failure(directive, vec![entry]).await
            }
        }
    }

    async fn pump(&mut self, mut connection: Box<dyn StreamConnection>) -> Step {
        loop {
            tokio::select! {
                _ = self.stop.stopped() => {
                    if let Err(e) = connection.close(NORMAL_CLOSE, "User disconnect").await {
                        debug!(error = %e, "close handshake failed");
                    }
                    return Step::Stop;
                }
                command = self.commands.recv() => match command {
                    Some(DriverCommand::Send(text)) => {
                        debug!(bytes = text.len(), "sending frame");
                        if let Err(e) = connection.send(text).await {
                            warn!(error = %e, "failed to send frame");
                        }
                    }
                    Some(DriverCommand::Reconnect) => debug!("already connected; ignoring reconnect"),
                    None => {
                        if let Err(e) = connection.close(NORMAL_CLOSE, "User disconnect").await {
                            debug!(error = %e, "close handshake failed");
                        }
                        return Step::Stop;
                    }
                },
                frame = connection.recv() => match frame {
                    Some(Ok(Frame::Text(text))) => self.route(&text).await,
                    Some(Ok(Frame::Close { code, reason })) => {
                        return self.closed(CloseReason::from_code(code, reason)).await;
                    }
                    Some(Err(e)) => return self.closed(CloseReason::dropped(e.to_string())).await,
                    None => return self.closed(CloseReason::dropped("")).await,
                },
            }
        }
    }

    async fn closed(&mut self, reason: CloseReason) -> Step {
        let directive = self.machine.on_close(&reason);
        self.release_run().await;
        if reason.is_normal() {
            info!("server closed the connection");
            self.sync(Vec::new()).await;
            return Step::Idle;
        }
        warn!(%reason, "connection lost");
        let entry = LogEntry::error(format!("Connection lost {}", reason));
        self.after_failure(directive, vec![entry]).await
    }

    async fn after_failure(&mut self, directive: Directive, mut entries: Vec<LogEntry>) -> Step {
        let max_attempts = self.machine.backoff().max_attempts;
        let step = match directive {
            Directive::Reconnect { attempt, delay } => {
                info!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                entries.push(LogEntry::info(format!(
                    "Reconnecting in {}s... (attempt {}/{})",
                    delay.as_secs_f64(),
                    attempt,
                    max_attempts
                )));
                Step::Backoff(delay)
            }
            Directive::GiveUp => {
                error!(max_attempts, "reconnect attempts exhausted");
                entries.push(LogEntry::error(
                    "Max reconnection attempts reached. Reconnect manually to continue.",
                ));
                Step::Idle
            }
            Directive::Idle => Step::Idle,
        };
        self.sync(entries).await;
        step
    }

    async fn wait_backoff(&mut self, delay: Duration) -> Step {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.stop.stopped() => return Step::Stop,
                _ = &mut sleep => break,
                command = self.commands.recv() => match command {
                    Some(DriverCommand::Send(_)) => debug!("not connected; dropping outbound frame"),
                    Some(DriverCommand::Reconnect) => {
                        debug!("manual reconnect; skipping backoff");
                        break;
                    }
                    None => return Step::Stop,
                },
            }
        }

        match self.machine.on_reconnect_due() {
            Ok(()) => {
                self.sync(Vec::new()).await;
                Step::Connect
            }
            Err(e) => {
                debug!(error = %e, "reconnect no longer scheduled");
                Step::Idle
            }
        }
    }

    async fn wait_idle(&mut self) -> Step {
        loop {
            tokio::select! {
                _ = self.stop.stopped() => return Step::Stop,
                command = self.commands.recv() => match command {
                    Some(DriverCommand::Send(_)) => debug!("not connected; dropping outbound frame"),
                    Some(DriverCommand::Reconnect) => {
                        info!("manual reconnect requested");
                        self.machine.reset_for_manual_reconnect();
                        return self.begin().await;
                    }
                    None => return Step::Stop,
                },
            }
        }
    }

    // ── State publication ───────────────────────────────────────────────

    async fn route(&self, raw: &str) {
        debug!(bytes = raw.len(), "frame received");
        match parse_message(raw) {
            Ok(event) => {
                self.shared
                    .update(|state, out| out.extend(state.apply_event(event)))
                    .await
            }
            Err(e) => {
                self.shared
                    .update(|state, out| out.push(state.apply_protocol_error(&e)))
                    .await
            }
        }
    }

    /// Publish machine transitions, then `entries`.
    /// Lifecycle events for a run in flight died with the channel.
    async fn release_run(&self) {
        self.shared
            .update(|state, out| {
                if let Some(event) = state.release_run() {
                    debug!("channel lost during a run; clearing running flag");
                    out.push(event);
                }
            })
            .await;
    }

    async fn sync(&mut self, entries: Vec<LogEntry>) {
        let transitions = self.machine.drain_transitions();
        self.shared
            .update(|state, out| {
                for transition in transitions {
                    if transition.status == ConnectionStatus::Connecting {
                        state.last_error = None;
                    }
                    out.push(state.set_connection(transition));
                }
                for entry in entries {
                    out.push(state.record(entry));
                }
            })
            .await;
    }
}
