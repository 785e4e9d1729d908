use async_trait::async_trait;

use crate::domain::TransportError;

// Port for one duplex text-message connection.
// `recv` must be cancel safe: the session loop polls it inside `tokio::select!`.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;
    // `None` once the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

// Port for opening transports; the session client depends on this, not on a socket library.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    async fn connect(&self, url: &str) -> Result<Self::Transport, TransportError>;
}
