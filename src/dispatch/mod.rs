//! Command dispatcher.
//!
//! Submits runs over the request/response channel, sends telemetry
//! acknowledgements over the streaming channel and keeps the single
//! outstanding run correlated with the lifecycle events that follow it.

pub mod client;

pub use client::{ExecuteClient, HttpExecuteClient};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::errors::RunError;
use crate::logbuf::LogEntry;
use crate::protocol::{Acknowledgement, ExecuteRequest, ExecuteResponse, HealthStatus, JointState};
use crate::session::stop::StopSignal;
use crate::session::{DriverCommand, SessionEvent, Shared};

/// A submitted run awaiting its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub id: Uuid,
    pub request: ExecuteRequest,
    pub submitted_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl RunRequest {
    pub fn new(request: ExecuteRequest, timeout: Duration) -> Self {
        let submitted_at = Utc::now();
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|t| submitted_at.checked_add_signed(t))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: Uuid::new_v4(),
            request,
            submitted_at,
            deadline,
        }
    }
}

/// Run bookkeeping: the outstanding request and the service-reported
/// running flag.
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    outstanding: Option<RunRequest>,
    running: bool,
}

impl RunTracker {
    /// Set by `execution_start`. Cleared by `execution_complete`, `error`, the
    /// answer to the outstanding submit or loss of the streaming channel.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn outstanding(&self) -> Option<&RunRequest> {
        self.outstanding.as_ref()
    }

    /// True while a new submit would be rejected.
    pub fn is_busy(&self) -> bool {
        self.outstanding.is_some() || self.running
    }

    pub fn begin(&mut self, run: RunRequest) -> Result<(), RunError> {
        if self.is_busy() {
            return Err(RunError::AlreadyRunning);
        }
        self.outstanding = Some(run);
        Ok(())
    }

    /// Clear the outstanding request if it is `id`, leaving the running flag.
    fn finish(&mut self, id: Uuid) -> bool {
        if self.outstanding.as_ref().is_some_and(|r| r.id == id) {
            self.outstanding = None;
            true
        } else {
            false
        }
    }

    /// The submit for `id` resolved, either way. The service answers only
    /// after the run has ended, so the running flag is cleared with the
    /// outstanding request. Returns whether the running flag changed.
    pub fn settle(&mut self, id: Uuid) -> bool {
        self.finish(id) && std::mem::replace(&mut self.running, false)
    }

    /// Returns whether the flag changed.
    pub fn on_started(&mut self) -> bool {
        !std::mem::replace(&mut self.running, true)
    }

    /// Returns whether the flag changed.
    pub fn on_completed(&mut self) -> bool {
        std::mem::replace(&mut self.running, false)
    }
}

/// Issues commands on behalf of a session.
#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn ExecuteClient>,
    shared: Shared,
    outbound: mpsc::Sender<DriverCommand>,
    timeout: Duration,
    stop: StopSignal,
}

impl Dispatcher {
    pub(crate) fn new(
        client: Arc<dyn ExecuteClient>,
        shared: Shared,
        outbound: mpsc::Sender<DriverCommand>,
        timeout: Duration,
        stop: StopSignal,
    ) -> Self {
        Self {
            client,
            shared,
            outbound,
            timeout,
            stop,
        }
    }

    /// Submit `code` with `stdin` and wait for the service's answer.
    pub async fn submit_run(
        &self,
        code: impl Into<String>,
        stdin: impl Into<String>,
    ) -> Result<ExecuteResponse, RunError> {
        self.submit(ExecuteRequest::new(code).with_stdin(stdin)).await
    }

    /// Submit a fully built request.
    ///
    /// Rejected without a remote call when the streaming channel is not
    /// connected or another run is outstanding. Every failure is also
    /// recorded as an error log entry and as `last_error`.
    pub async fn submit(&self, request: ExecuteRequest) -> Result<ExecuteResponse, RunError> {
        let run = RunRequest::new(request, self.timeout);
        let span = info_span!("run", run_id = %run.id);
        self.submit_run_request(run).instrument(span).await
    }

    async fn submit_run_request(&self, run: RunRequest) -> Result<ExecuteResponse, RunError> {
        let id = run.id;
        let request = run.request.clone();

        let admitted = self
            .shared
            .update(|state, out| {
                if !state.connection.is_connected() {
                    return Err(RunError::NotConnected);
                }
                state.runs.begin(run)?;
                out.push(state.record(LogEntry::input(request.code.clone())));
                Ok(())
            })
            .await;
        if let Err(e) = admitted {
            warn!(error = %e, "run rejected");
            self.shared
                .update(|state, out| out.push(Self::record_failure(state, &e)))
                .await;
            return Err(e);
        }

        info!(bytes = request.code.len(), "submitting run");
        let mut stop = self.stop.clone();
        let outcome = tokio::select! {
            _ = stop.stopped() => Err(RunError::Abandoned),
            result = tokio::time::timeout(self.timeout, self.client.execute(&request)) => {
                result.unwrap_or(Err(RunError::Timeout {
                    secs: self.timeout.as_secs(),
                }))
            }
        };

        match &outcome {
            Ok(response) => {
                info!(success = response.success, "run finished");
                self.shared
                    .update(|state, out| {
                        if state.runs.settle(id) {
                            out.push(SessionEvent::Running(false));
                        }
                    })
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "run failed");
                self.shared
                    .update(|state, out| {
                        if state.runs.settle(id) {
                            out.push(SessionEvent::Running(false));
                        }
                        out.push(Self::record_failure(state, e));
                    })
                    .await;
            }
        }
        outcome
    }

    fn record_failure(state: &mut crate::session::SessionState, err: &RunError) -> SessionEvent {
        state.last_error = Some(err.to_string());
        state.record(LogEntry::error(format!("Execution failed: {}", err)))
    }

    /// Confirm a telemetry snapshot back to the service.
    ///
    /// Fire-and-forget: dropped when not connected. Returns whether the frame
    /// was queued.
    pub async fn acknowledge(&self, joints: &JointState) -> bool {
        if !self.shared.read().await.connection.is_connected() {
            debug!("not connected; dropping acknowledgement");
            return false;
        }
        let frame = match serde_json::to_string(&Acknowledgement::new(joints.clone())) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "failed to encode acknowledgement");
                return false;
            }
        };
        match self.outbound.try_send(DriverCommand::Send(frame)) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "outbound queue unavailable; dropping acknowledgement");
                false
            }
        }
    }

    pub async fn clear_logs(&self) {
        self.shared
            .update(|state, out| {
                state.logs.clear();
                out.push(SessionEvent::LogsCleared);
            })
            .await;
    }

    /// Probe `GET /health`, bounded by the request timeout.
    pub async fn health(&self) -> Result<HealthStatus, RunError> {
        tokio::time::timeout(self.timeout, self.client.health())
            .await
            .unwrap_or(Err(RunError::Timeout {
                secs: self.timeout.as_secs(),
            }))
    }
}
