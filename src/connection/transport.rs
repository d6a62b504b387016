use async_trait::async_trait;

use crate::errors::ConnectionError;

/// One frame read from the streaming channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// The peer closed the channel. `code` is absent when the close frame
    /// carried no status.
    Close { code: Option<u16>, reason: String },
}

/// An open streaming connection.
#[async_trait]
pub trait StreamConnection: Send {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Next frame, or `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<Frame, ConnectionError>>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), ConnectionError>;
}

/// Opens streaming connections.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, ConnectionError>;
}
