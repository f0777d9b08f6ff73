/// Server Configuration
///
/// All settings come from environment variables so the same binary serves
/// both container variants: the STDIO image uses the defaults, the HTTP image
/// sets `MCP_TRANSPORT_MODE=http` and `PORT=8080`.
///
/// Environment Variables:
/// - MCP_TRANSPORT_MODE: "stdio", "http", or "both" (default: "stdio")
/// - HOST: Bind address for HTTP mode (default: "0.0.0.0")
/// - PORT: Port number for HTTP mode (default: 8080)
/// - WORKER_THREADS: HTTP worker count (default: CPU count, max 16)
/// - SPLITFAST_DB: SQLite database path (default: "splitfast.db")
/// - SERVER_NAME: Name reported to clients (default: "SplitFast")
/// - SERVER_VERSION: Version reported to clients (default: crate version)
/// - MCP_SESSION_IDLE_SECS: Idle lifetime of an HTTP session (default: 1800)
/// - MCP_MAX_SESSIONS: Maximum live HTTP sessions (default: 10000)

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_SERVER_NAME: &str = "SplitFast";
pub const DEFAULT_DB_PATH: &str = "splitfast.db";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;
const MAX_DEFAULT_WORKERS: usize = 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid transport mode '{0}': must be 'stdio', 'http', or 'both'")]
    TransportMode(String),

    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

/// How the server talks to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// Streamable HTTP on HOST:PORT.
    Http,
    /// Both transports concurrently.
    Both,
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" | "streamable-http" => Ok(Self::Http),
            "both" => Ok(Self::Both),
            _ => Err(ConfigError::TransportMode(s.to_string())),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Both => "both",
        })
    }
}

/// Server metadata reported in `initialize` responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub info: ServerInfo,
    pub transport: TransportMode,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub db_path: String,
    /// HTTP sessions unused for this long are forgotten.
    pub session_idle: Duration,
    pub max_sessions: usize,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let transport = get("MCP_TRANSPORT_MODE", "stdio").parse()?;
        let port = parse_var(&lookup, "PORT")?.unwrap_or(DEFAULT_PORT);
        let workers = parse_var::<usize>(&lookup, "WORKER_THREADS")?
            .filter(|w| *w > 0)
            .unwrap_or_else(|| num_cpus::get().clamp(1, MAX_DEFAULT_WORKERS));
        let session_idle =
            parse_var(&lookup, "MCP_SESSION_IDLE_SECS")?.unwrap_or(DEFAULT_SESSION_IDLE_SECS);
        let max_sessions = parse_var::<usize>(&lookup, "MCP_MAX_SESSIONS")?
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_MAX_SESSIONS);

        Ok(Self {
            info: ServerInfo {
                name: get("SERVER_NAME", DEFAULT_SERVER_NAME),
                version: get("SERVER_VERSION", env!("CARGO_PKG_VERSION")),
            },
            transport,
            host: get("HOST", "0.0.0.0"),
            port,
            workers,
            db_path: get("SPLITFAST_DB", DEFAULT_DB_PATH),
            session_idle: Duration::from_secs(session_idle),
            max_sessions,
        })
    }

    /// `host:port` string for the HTTP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
