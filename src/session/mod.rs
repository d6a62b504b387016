//! Execution session.
//!
//! [`Session`] is the façade collaborators hold: it owns the connection
//! driver task, exposes the merged state and forwards commands to the
//! dispatcher.
//!
//! ```text
//!  transport ──frames──▶ driver ──apply_event──▶ SessionState ──▶ broadcast / watch
//!                          ▲                          ▲
//!                  DriverCommand                 submit_run
//!                          └──────── Dispatcher ──────┘
//! ```

mod driver;
pub mod state;
pub(crate) mod stop;

pub use driver::DriverCommand;
pub use state::{SessionEvent, SessionState, Shared};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{BridgeConfig, Endpoints};
use crate::connection::{ConnectionMachine, ConnectionState, StreamTransport, WsTransport};
use crate::dispatch::{Dispatcher, ExecuteClient, HttpExecuteClient};
use crate::errors::{ConfigError, ConnectionError, RunError};
use crate::logbuf::LogEntry;
use crate::protocol::{ExecuteRequest, ExecuteResponse, HealthStatus, JointState};
use driver::Driver;
use stop::{StopHandle, stop_signal};

const COMMAND_QUEUE_CAPACITY: usize = 256;

pub struct Session {
    shared: Shared,
    dispatcher: Dispatcher,
    commands: mpsc::Sender<DriverCommand>,
    stop: StopHandle,
    driver: Mutex<Option<JoinHandle<()>>>,
    endpoints: Endpoints,
}

impl Session {
    /// Start a session over the given seams and begin connecting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: &BridgeConfig,
        transport: Arc<dyn StreamTransport>,
        client: Arc<dyn ExecuteClient>,
    ) -> Result<Self, ConfigError> {
        let endpoints = config.endpoints()?;
        let shared = Shared::new(SessionState::new(
            config.reconnect.max_attempts,
            config.logs.max_entries,
        ));
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (stop, signal) = stop_signal();

        let driver = Driver::new(
            transport,
            endpoints.ws_url.clone(),
            ConnectionMachine::new(config.backoff()),
            shared.clone(),
            rx,
            signal.clone(),
        );
        let handle = tokio::spawn(driver.run());
        info!(url = %endpoints.ws_url, "session started");

        let dispatcher = Dispatcher::new(
            client,
            shared.clone(),
            commands.clone(),
            config.request_timeout(),
            signal,
        );

        Ok(Self {
            shared,
            dispatcher,
            commands,
            stop,
            driver: Mutex::new(Some(handle)),
            endpoints,
        })
    }

    /// Start a session over WebSocket and HTTP.
    pub fn connect(config: &BridgeConfig) -> Result<Self, ConfigError> {
        let endpoints = config.endpoints()?;
        Self::start(
            config,
            Arc::new(WsTransport::new(config.connect_timeout())),
            Arc::new(HttpExecuteClient::new(endpoints)),
        )
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    // ── Observers ───────────────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.watch_status().borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.shared.watch_status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.shared.read().await.runs.is_running()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.shared.read().await.last_error.clone()
    }

    pub async fn logs(&self) -> Vec<LogEntry> {
        self.shared.read().await.logs.snapshot()
    }

    pub async fn telemetry(&self) -> JointState {
        self.shared.read().await.telemetry.snapshot()
    }

    /// Wait until the connection is open. Returns false on timeout.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut status = self.watch_status();
        matches!(
            tokio::time::timeout(timeout, status.wait_for(ConnectionState::is_connected)).await,
            Ok(Ok(_))
        )
    }

    // ── Commands ────────────────────────────────────────────────────────

    pub async fn submit_run(
        &self,
        code: impl Into<String>,
        stdin: impl Into<String>,
    ) -> Result<ExecuteResponse, RunError> {
        self.dispatcher.submit_run(code, stdin).await
    }

    pub async fn submit(&self, request: ExecuteRequest) -> Result<ExecuteResponse, RunError> {
        self.dispatcher.submit(request).await
    }

    pub async fn acknowledge(&self, joints: &JointState) -> bool {
        self.dispatcher.acknowledge(joints).await
    }

    pub async fn clear_logs(&self) {
        self.dispatcher.clear_logs().await
    }

    pub async fn reset_telemetry(&self) {
        self.shared
            .update(|state, out| {
                state.telemetry.reset();
                out.push(SessionEvent::Telemetry(state.telemetry.snapshot()));
            })
            .await;
    }

    pub async fn health(&self) -> Result<HealthStatus, RunError> {
        self.dispatcher.health().await
    }

    /// Manual reconnect. Clears exhausted retries; a pending backoff is
    /// skipped. No effect while connected.
    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        self.commands
            .send(DriverCommand::Reconnect)
            .await
            .map_err(|_| ConnectionError::Transport("session is shut down".to_string()))
    }

    /// Close the connection cleanly and stop the driver.
    ///
    /// Pending reconnects are cancelled and an outstanding run resolves as
    /// [`RunError::Abandoned`].
    pub async fn shutdown(&self) {
        self.stop.stop();
        let handle = self.driver.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "session driver ended abnormally");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop.stop();
    }
}
