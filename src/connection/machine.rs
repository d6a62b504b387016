//! Connection lifecycle state machine.
//!
//! Pure bookkeeping: the driver task performs the I/O and reports what
//! happened, the machine answers with the next state and a [`Directive`]
//! telling the driver whether to schedule a reconnect.

use std::time::Duration;

use super::backoff::Backoff;
use super::{CloseReason, ConnectionState, ConnectionStatus};
use crate::errors::ConnectionError;

/// What the driver should do after a failure or close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Nothing to schedule.
    Idle,
    /// Sleep for `delay`, then call [`ConnectionMachine::on_reconnect_due`].
    Reconnect { attempt: u32, delay: Duration },
    /// Attempts are exhausted; wait for a manual reconnect.
    GiveUp,
}

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    backoff: Backoff,
    reconnect_pending: bool,
    transitions: Vec<ConnectionState>,
}

impl ConnectionMachine {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::disconnected(backoff.max_attempts),
            backoff,
            reconnect_pending: false,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// States entered since the last drain, oldest first.
    pub fn drain_transitions(&mut self) -> Vec<ConnectionState> {
        std::mem::take(&mut self.transitions)
    }

    /// Start a fresh connection attempt.
    pub fn begin_connect(&mut self) -> Result<(), ConnectionError> {
        match self.state.status {
            ConnectionStatus::Connecting => return Err(ConnectionError::AttemptInFlight),
            ConnectionStatus::Connected => return Err(ConnectionError::AlreadyConnected),
            _ => {}
        }
        if self.reconnect_pending {
            return Err(ConnectionError::ReconnectPending);
        }
        if self.state.exhausted {
            return Err(ConnectionError::RetriesExhausted);
        }
        self.enter(ConnectionStatus::Connecting);
        Ok(())
    }

    /// The backoff timer fired.
    pub fn on_reconnect_due(&mut self) -> Result<(), ConnectionError> {
        if !self.reconnect_pending {
            return Err(ConnectionError::NoReconnectScheduled);
        }
        self.reconnect_pending = false;
        self.state.retry_in = None;
        self.enter(ConnectionStatus::Connecting);
        Ok(())
    }

    pub fn on_open(&mut self) {
        self.state.attempts = 0;
        self.state.exhausted = false;
        self.state.retry_in = None;
        self.reconnect_pending = false;
        self.enter(ConnectionStatus::Connected);
    }

    pub fn on_connect_failed(&mut self) -> Directive {
        self.fail()
    }

    pub fn on_close(&mut self, reason: &CloseReason) -> Directive {
        self.state.retry_in = None;
        self.enter(ConnectionStatus::Disconnected);
        match reason {
            CloseReason::Normal => {
                self.reconnect_pending = false;
                Directive::Idle
            }
            CloseReason::Abnormal { .. } => self.fail(),
        }
    }

    /// Local, deliberate close. Cancels any scheduled reconnect.
    pub fn on_requested_close(&mut self) {
        self.reconnect_pending = false;
        self.state.retry_in = None;
        if self.state.status != ConnectionStatus::Disconnected {
            self.enter(ConnectionStatus::Disconnected);
        }
    }

    /// Forget previous failures so [`begin_connect`](Self::begin_connect) is
    /// allowed again.
    pub fn reset_for_manual_reconnect(&mut self) {
        self.state.attempts = 0;
        self.state.exhausted = false;
        self.state.retry_in = None;
        self.reconnect_pending = false;
    }

    fn fail(&mut self) -> Directive {
        if self.state.attempts < self.backoff.max_attempts {
            self.state.attempts += 1;
            let delay = self.backoff.delay_for(self.state.attempts);
            self.state.retry_in = Some(delay);
            self.reconnect_pending = true;
            self.enter(ConnectionStatus::Error);
            Directive::Reconnect {
                attempt: self.state.attempts,
                delay,
            }
        } else {
            self.state.exhausted = true;
            self.state.retry_in = None;
            self.reconnect_pending = false;
            self.enter(ConnectionStatus::Error);
            Directive::GiveUp
        }
    }

    fn enter(&mut self, status: ConnectionStatus) {
        self.state.status = status;
        self.transitions.push(self.state.clone());
    }
}
