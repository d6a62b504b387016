//! In-process stand-in for the code-dock execution service.
//!
//! Serves `/ws`, `/execute` and `/health` on an ephemeral port. `/execute`
//! does not run anything: it broadcasts a canned event sequence and answers
//! in the `{exit_code, stdout, stderr}` shape. Code containing `raise` exits
//! with status 1.

#![allow(dead_code)]

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub struct Dock {
    frames: broadcast::Sender<String>,
    kicks: broadcast::Sender<(u16, String)>,
    connections: AtomicUsize,
    acks: Mutex<Vec<Value>>,
    requests: Mutex<Vec<Value>>,
}

impl Dock {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn acks(&self) -> Vec<Value> {
        self.acks.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// Close every streaming client with `code`.
    pub fn kick(&self, code: u16, reason: &str) {
        let _ = self.kicks.send((code, reason.to_string()));
    }

    fn broadcast(&self, frame: Value) {
        let _ = self.frames.send(frame.to_string());
    }
}

/// Serve on the current runtime.
pub async fn start() -> (SocketAddr, Arc<Dock>) {
    let (frames, _) = broadcast::channel(256);
    let (kicks, _) = broadcast::channel(8);
    let dock = Arc::new(Dock {
        frames,
        kicks,
        connections: AtomicUsize::new(0),
        acks: Mutex::new(Vec::new()),
        requests: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/execute", post(execute_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::clone(&dock));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, dock)
}

/// Serve on a dedicated thread, for tests that drive the binary synchronously.
pub fn start_background() -> (SocketAddr, Arc<Dock>) {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            tx.send(start().await).unwrap();
            std::future::pending::<()>().await;
        });
    });
    rx.recv().unwrap()
}

/// Server URL for a dock bound at `addr`.
pub fn server_url(addr: SocketAddr) -> String {
    format!("ws://{}", addr)
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

async fn ws_handler(ws: WebSocketUpgrade, State(dock): State<Arc<Dock>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client(socket, dock))
}

async fn client(socket: WebSocket, dock: Arc<Dock>) {
    let mut frames = dock.frames.subscribe();
    let mut kicks = dock.kicks.subscribe();
    dock.connections.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Ok(frame) = frame else { break };
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            kick = kicks.recv() => {
                if let Ok((code, reason)) = kick {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                        .await;
                }
                break;
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Value>(text.as_str()) {
                        Ok(value) if value["type"] == "joint_position_confirmed" => {
                            dock.acks.lock().unwrap().push(value.clone());
                            dock.broadcast(value);
                        }
                        _ => {
                            let reply = format!("Server received: {}", text.as_str());
                            let _ = sink.send(Message::Text(reply.into())).await;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    }
    dock.connections.fetch_sub(1, Ordering::SeqCst);
}

async fn execute_handler(State(dock): State<Arc<Dock>>, Json(body): Json<Value>) -> Json<Value> {
    dock.requests.lock().unwrap().push(body.clone());
    let code = body["code"].as_str().unwrap_or_default().to_string();
    let failing = code.contains("raise");

    dock.broadcast(json!({"type": "execution_start", "data": "Starting Python execution...", "timestamp": 1.0}));
    dock.broadcast(json!({"type": "stdout", "data": "hello\n", "timestamp": 1.1}));
    dock.broadcast(json!({
        "type": "joint_state",
        "data": {"base_to_shoulder": 0.5, "shoulder_to_elbow": -1.25},
        "timestamp": 1.2
    }));

    let (exit_code, stderr) = if failing {
        dock.broadcast(json!({"type": "stderr", "data": "Traceback: boom\n", "timestamp": 1.3}));
        (1, "Traceback: boom\n")
    } else {
        (0, "")
    };
    dock.broadcast(json!({
        "type": "execution_complete",
        "data": format!("Execution finished with exit code: {}", exit_code),
        "timestamp": 1.4
    }));

    Json(json!({"exit_code": exit_code, "stdout": "hello\n", "stderr": stderr, "tests": []}))
}

async fn health_handler(State(dock): State<Arc<Dock>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "connections": dock.connections(),
        "message": "WebSocket Python execution server running"
    }))
}
