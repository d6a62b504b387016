//! In-memory fakes for the transport and client seams.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

use crate::connection::{Frame, StreamConnection, StreamTransport};
use crate::dispatch::ExecuteClient;
use crate::errors::{ConnectionError, RunError};
use crate::protocol::{ExecuteRequest, ExecuteResponse, HealthStatus};

// ── Transport ───────────────────────────────────────────────────────────

/// Fails the first `fail_first` connects, then hands each accepted
/// connection's server side out through the peer channel.
pub(crate) struct FakeTransport {
    connects: AtomicUsize,
    fail_first: usize,
    peers: mpsc::UnboundedSender<FakePeer>,
}

impl FakeTransport {
    pub(crate) fn failing_first(fail_first: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<FakePeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            connects: AtomicUsize::new(0),
            fail_first,
            peers,
        });
        (transport, rx)
    }

    pub(crate) fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<FakePeer>) {
        Self::failing_first(0)
    }

    pub(crate) fn always_failing() -> (Arc<Self>, mpsc::UnboundedReceiver<FakePeer>) {
        Self::failing_first(usize::MAX)
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, ConnectionError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(ConnectionError::Handshake {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(Mutex::new(None));
        let _ = self.peers.send(FakePeer {
            to_client,
            from_client,
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(FakeConnection {
            incoming,
            outgoing,
            closed,
        }))
    }
}

struct FakeConnection {
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<String>,
    closed: Arc<Mutex<Option<u16>>>,
}

#[async_trait]
impl StreamConnection for FakeConnection {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.outgoing
            .send(text)
            .map_err(|_| ConnectionError::SendFailed("peer gone".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, ConnectionError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<(), ConnectionError> {
        *self.closed.lock().unwrap() = Some(code);
        Ok(())
    }
}

/// Server side of one fake connection. Dropping it ends the stream
/// without a close frame.
pub(crate) struct FakePeer {
    to_client: mpsc::UnboundedSender<Frame>,
    pub(crate) from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<Mutex<Option<u16>>>,
}

impl FakePeer {
    pub(crate) fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(Frame::Text(text.to_string()));
    }

    pub(crate) fn send(&self, value: serde_json::Value) {
        self.send_raw(&value.to_string());
    }

    pub(crate) fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(Frame::Close {
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    /// Close code the client sent, if it closed the connection.
    pub(crate) fn client_close_code(&self) -> Option<u16> {
        *self.closed.lock().unwrap()
    }
}

// ── Client ──────────────────────────────────────────────────────────────

pub(crate) enum Behavior {
    Respond(ExecuteResponse),
    Fail(RunError),
    /// Never answers.
    Hang,
    /// Answers once the gate is notified.
    Gated(Arc<Notify>, ExecuteResponse),
}

pub(crate) struct FakeClient {
    behavior: Behavior,
    calls: AtomicUsize,
    requests: Mutex<Vec<ExecuteRequest>>,
}

impl FakeClient {
    pub(crate) fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn responding(response: ExecuteResponse) -> Arc<Self> {
        Self::new(Behavior::Respond(response))
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<ExecuteRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecuteClient for FakeClient {
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse, RunError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match &self.behavior {
            Behavior::Respond(response) => Ok(response.clone()),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Hang => std::future::pending().await,
            Behavior::Gated(gate, response) => {
                gate.notified().await;
                Ok(response.clone())
            }
        }
    }

    async fn health(&self) -> Result<HealthStatus, RunError> {
        Ok(HealthStatus {
            status: "healthy".to_string(),
            connections: 1,
            message: "fake".to_string(),
        })
    }
}

/// Poll `check` until it holds, yielding to the runtime between polls.
pub(crate) async fn eventually<F>(check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
