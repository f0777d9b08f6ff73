/// Core Server Framework Module
///
/// This module contains the core server implementation including:
/// - config.rs: Environment-driven configuration
/// - error.rs: Tool error types
/// - server.rs: MCP dispatcher with Streamable HTTP and STDIO transports
/// - session.rs: Streamable HTTP session bookkeeping

pub mod config;
pub mod error;
pub mod server;
pub mod session;
