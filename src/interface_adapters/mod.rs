// Interface adapters: wire protocol, network transport, and REST clients.

pub mod clients;
pub mod http;
pub mod net;
pub mod protocol;
