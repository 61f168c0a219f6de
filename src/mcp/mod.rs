// MCP tool server over stdio (JSON-RPC 2.0, one message per line)

pub mod jsonrpc;
pub mod server;
pub mod tools;

pub use server::{run, serve_stdio};
