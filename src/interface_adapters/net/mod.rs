// Network adapters: session endpoint, WebSocket transport, and the session protocol client.

pub mod endpoint;
pub mod session;
pub mod ws;

#[cfg(test)]
pub(crate) mod scripted;

pub use endpoint::SessionEndpoint;
pub use session::{ClientSettings, SessionClient};
pub use ws::{WsConnector, WsTransport};
