//! RPC surface
//!
//! MCP-shaped JSON-RPC over two transports. Both feed the same
//! `McpService`; the transports only own framing and the per-session push
//! channel.

mod http;
mod protocol;
mod service;
mod stdio;
mod tools;

pub use http::serve as serve_http;
pub use protocol::{JsonRpcRequest, JsonRpcResponse};
pub use service::McpService;
pub use stdio::run as run_stdio;
