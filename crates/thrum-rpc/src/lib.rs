//! JSON-RPC 2.0 surface of the daemon.
//!
//! One object per WebSocket text frame for remote clients, newline-
//! delimited objects over the unix socket for local ones. Both transports
//! share the same connection state machine and method table; server→client
//! notifications (subscription pushes) are frames without an id.

mod methods;
mod protocol;
mod server;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::RpcServer;
