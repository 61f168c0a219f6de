// Tesla MCP - library root

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http_client;
pub mod mcp;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod setup;
