/// MCP Server Implementation
///
/// This module contains the core MCP server implementation including:
/// - JSON-RPC 2.0 request/response structures
/// - Tool registry for managing available tools
/// - `McpServer`, the transport-independent request dispatcher
/// - Streamable HTTP transport with Actix Web
/// - STDIO transport for line-based communication

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer,
    http::header,
    middleware::{Compress, DefaultHeaders, Logger},
    web,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::config::{Config, ServerInfo};
use crate::core::error::ToolError;
use crate::core::session::SessionStore;
use crate::ledger::Ledger;
use crate::tools;

/// Protocol revisions this server can speak, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Header carrying the Streamable HTTP session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

const INSTRUCTIONS: &str = "SplitFast tracks shared expenses. Call create_group first and keep the \
returned secret private; every other tool needs group_id and secret. add_expense splits an amount \
evenly among participants, balances returns the transfers that settle the group.";

/// JSON-RPC error codes used by this server.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Streamable HTTP session id not known to this server.
    pub const SESSION_NOT_FOUND: i32 = -32001;
}

/// JSON-RPC 2.0 request structure for MCP protocol.
///
/// The id is None for notifications.
#[derive(Deserialize, Debug)]
pub struct MCPRequest {
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// JSON-RPC 2.0 response structure for MCP protocol.
///
/// Exactly one of `result` and `error` is present. The id is serialized as
/// `null` when the request id could not be determined.
#[derive(Serialize, Debug)]
pub struct MCPResponse {
    jsonrpc: &'static str,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<MCPError>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Serialize, Debug)]
pub struct MCPError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl MCPResponse {
    pub fn result(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(MCPError { code, message: message.into(), data: None }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// MCP tool definition structure.
///
/// Serialized as-is in `tools/list` responses.
#[derive(Serialize, Debug, Clone)]
pub struct MCPTool {
    /// Unique tool identifier (e.g., "create_group")
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema defining the tool's input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Tool handler function type definition.
///
/// Handlers are boxed closures taking the JSON arguments object. They must be
/// Send + Sync because HTTP workers share one registry.
pub type ToolHandler = Box<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;

/// Registry of available MCP tools.
///
/// Keeps definitions in registration order for discovery and a map of
/// handlers for execution.
#[derive(Default)]
pub struct ToolRegistry {
    pub tools: Vec<MCPTool>,
    pub handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    /// Create an empty registry.
    ///
    /// # Returns
    /// A registry with no tools; populate it with `register` or
    /// `tools::register_all`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool definition and its handler.
    ///
    /// # Arguments
    /// * `tool` - Definition advertised by `tools/list`
    /// * `handler` - Closure run by `tools/call`
    ///
    /// A later registration under the same name replaces the handler.
    pub fn register(&mut self, tool: MCPTool, handler: ToolHandler) {
        let name = tool.name.clone();
        self.tools.push(tool);
        self.handlers.insert(name, handler);
    }
}

/// Create the tool registry with every SplitFast tool bound to `ledger`.
///
/// # Arguments
/// * `ledger` - Shared ledger the tool handlers read and write
///
/// # Returns
/// The registry, ready to hand to `McpServer::new`.
pub fn initialize_tools(ledger: Arc<Ledger>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    tools::register_all(&mut registry, ledger);
    Arc::new(registry)
}

/// Result of handling one transport payload.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Serialized reply; None when the payload held only notifications.
    pub reply: Option<Value>,
    /// An `initialize` request completed successfully.
    pub initialized: bool,
    /// The payload was not valid JSON.
    pub malformed: bool,
}

/// Transport-independent MCP request dispatcher.
///
/// Both the STDIO loop and the HTTP handlers feed raw payloads into
/// `handle_payload` and write back whatever it returns.
pub struct McpServer {
    info: ServerInfo,
    registry: Arc<ToolRegistry>,
}

impl McpServer {
    /// Create a dispatcher.
    ///
    /// # Arguments
    /// * `info` - Name and version reported by `initialize`
    /// * `registry` - Tools served by `tools/list` and `tools/call`
    pub fn new(info: ServerInfo, registry: Arc<ToolRegistry>) -> Self {
        Self { info, registry }
    }

    /// Server metadata, used in startup logs and the health endpoint.
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Handle one raw JSON-RPC payload: a single message or a batch.
    ///
    /// # Arguments
    /// * `payload` - Raw bytes of one STDIO line or one HTTP request body
    ///
    /// # Returns
    /// A `Dispatch` holding the reply (None when nothing needs answering)
    /// and flags the transport acts on.
    pub fn handle_payload(&self, payload: &[u8]) -> Dispatch {
        let mut dispatch = Dispatch::default();

        let message: Value = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "unparsable JSON-RPC payload");
                dispatch.malformed = true;
                dispatch.reply = to_value(&MCPResponse::error(None, codes::PARSE_ERROR, format!("Parse error: {e}")));
                return dispatch;
            }
        };

        match message {
            Value::Array(batch) if batch.is_empty() => {
                dispatch.reply = to_value(&MCPResponse::error(None, codes::INVALID_REQUEST, "Empty batch"));
            }
            Value::Array(batch) => {
                let responses: Vec<Value> = batch
                    .into_iter()
                    .filter_map(|m| self.handle_message(m, &mut dispatch.initialized))
                    .filter_map(|r| to_value(&r))
                    .collect();
                if !responses.is_empty() {
                    dispatch.reply = Some(Value::Array(responses));
                }
            }
            single => {
                dispatch.reply = self
                    .handle_message(single, &mut dispatch.initialized)
                    .and_then(|r| to_value(&r));
            }
        }

        dispatch
    }

    /// Handle one JSON-RPC message. Returns None for notifications.
    fn handle_message(&self, message: Value, initialized: &mut bool) -> Option<MCPResponse> {
        let fallback_id = message.get("id").cloned().filter(|id| !id.is_null());

        let request: MCPRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                return Some(MCPResponse::error(
                    fallback_id,
                    codes::INVALID_REQUEST,
                    format!("Invalid request: {e}"),
                ));
            }
        };
        if request.jsonrpc != "2.0" {
            return Some(MCPResponse::error(
                request.id,
                codes::INVALID_REQUEST,
                "Invalid request: jsonrpc must be \"2.0\"",
            ));
        }

        // Notifications are one-way messages that never get a response
        let Some(id) = request.id else {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params.as_ref()),
            "ping" => MCPResponse::result(Some(id), json!({})),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, request.params),
            other => MCPResponse::error(Some(id), codes::METHOD_NOT_FOUND, format!("Method not found: {other}")),
        };
        if request.method == "initialize" && !response.is_error() {
            *initialized = true;
        }
        Some(response)
    }

    /// Handle MCP initialize method.
    ///
    /// Echoes the client's protocol version when supported, otherwise offers
    /// the newest one this server speaks.
    fn handle_initialize(&self, id: Value, params: Option<&Value>) -> MCPResponse {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let version = requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0]);

        tracing::info!(requested = ?requested, negotiated = version, "client initialized");
        MCPResponse::result(
            Some(id),
            json!({
                "protocolVersion": version,
                "capabilities": {
                    "tools": { "listChanged": false }
                },
                "serverInfo": {
                    "name": self.info.name,
                    "version": self.info.version
                },
                "instructions": INSTRUCTIONS
            }),
        )
    }

    /// Handle MCP tools/list method. Tools are listed in registration order.
    fn handle_tools_list(&self, id: Value) -> MCPResponse {
        MCPResponse::result(Some(id), json!({ "tools": self.registry.tools }))
    }

    /// Handle MCP tools/call method.
    ///
    /// Tool failures are reported inside the result with `isError: true` so
    /// the model can see them; only protocol problems become JSON-RPC errors.
    fn handle_tools_call(&self, id: Value, params: Option<Value>) -> MCPResponse {
        let Some(params) = params.filter(Value::is_object) else {
            return MCPResponse::error(Some(id), codes::INVALID_PARAMS, "Invalid params");
        };
        let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
            return MCPResponse::error(Some(id), codes::INVALID_PARAMS, "Invalid params: missing tool name");
        };
        let Some(handler) = self.registry.handlers.get(tool_name) else {
            return MCPResponse::error(Some(id), codes::INVALID_PARAMS, format!("Unknown tool: {tool_name}"));
        };

        // Missing arguments are treated as an empty object so the tool reports
        // which field is required
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        match handler(arguments) {
            Ok(result) => {
                let text = result.to_string();
                MCPResponse::result(
                    Some(id),
                    json!({
                        "content": [
                            { "type": "text", "text": text }
                        ],
                        "structuredContent": result,
                        "isError": false
                    }),
                )
            }
            Err(e) => {
                tracing::info!(tool = tool_name, error = %e, "tool call failed");
                MCPResponse::result(
                    Some(id),
                    json!({
                        "content": [
                            { "type": "text", "text": format!("Error: {e}") }
                        ],
                        "isError": true
                    }),
                )
            }
        }
    }
}

fn to_value(response: &MCPResponse) -> Option<Value> {
    serde_json::to_value(response)
        .inspect_err(|e| tracing::error!(error = %e, "failed to serialize response"))
        .ok()
}

/// State shared across all HTTP worker threads.
pub struct HttpState {
    pub server: Arc<McpServer>,
    /// Live Streamable HTTP sessions with their last use.
    pub sessions: Mutex<SessionStore>,
    /// Total MCP requests served, for the metrics endpoint.
    pub requests: AtomicU64,
}

impl HttpState {
    /// Create the shared HTTP state.
    ///
    /// # Arguments
    /// * `server` - Dispatcher every worker forwards payloads to
    /// * `sessions` - Session store; its idle timeout and cap bound memory use
    pub fn new(server: Arc<McpServer>, sessions: SessionStore) -> Self {
        Self {
            server,
            sessions: Mutex::new(sessions),
            requests: AtomicU64::new(0),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, SessionStore> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn session_id(req: &HttpRequest) -> Option<&str> {
    req.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

/// True when the client only accepts an event stream.
fn wants_event_stream(req: &HttpRequest) -> bool {
    let accept = req
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    accept.contains("text/event-stream") && !accept.contains("application/json") && !accept.contains("*/*")
}

async fn health(state: web::Data<HttpState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": state.server.info().name
    }))
}

async fn metrics_handler(state: web::Data<HttpState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "requests_total": state.requests.load(Ordering::Relaxed),
        "sessions_active": state.sessions().active(Instant::now()),
        "status": "ok"
    }))
}

/// Streamable HTTP POST handler.
///
/// Accepts a JSON-RPC message or batch. Replies with JSON, or with a single
/// SSE `message` event when the client only accepts event streams. A
/// payload of notifications gets `202 Accepted` and no body.
///
/// A request carrying an unknown or expired `Mcp-Session-Id` gets 404 so the
/// client starts over with `initialize`.
async fn mcp_post(state: web::Data<HttpState>, req: HttpRequest, body: Bytes) -> HttpResponse {
    state.requests.fetch_add(1, Ordering::Relaxed);

    let mut session = session_id(&req).map(str::to_string);
    if let Some(id) = &session {
        if !state.sessions().touch(id, Instant::now()) {
            return HttpResponse::NotFound().json(MCPResponse::error(
                None,
                codes::SESSION_NOT_FOUND,
                "Session not found",
            ));
        }
    }

    // Tool calls hit SQLite, keep them off the async workers
    let server = state.server.clone();
    let dispatch = match web::block(move || server.handle_payload(&body)).await {
        Ok(dispatch) => dispatch,
        Err(e) => {
            tracing::error!(error = %e, "request dispatch failed");
            return HttpResponse::InternalServerError().json(MCPResponse::error(
                None,
                codes::INTERNAL_ERROR,
                "Internal error",
            ));
        }
    };

    if dispatch.initialized && session.is_none() {
        let id = uuid::Uuid::new_v4().to_string();
        state.sessions().open(id.clone(), Instant::now());
        tracing::info!(session = %id, "session opened");
        session = Some(id);
    }

    let mut builder = match (&dispatch.reply, dispatch.malformed) {
        (None, _) => HttpResponse::Accepted(),
        (Some(_), true) => HttpResponse::BadRequest(),
        (Some(_), false) => HttpResponse::Ok(),
    };
    if let Some(id) = &session {
        builder.insert_header((SESSION_HEADER, id.as_str()));
    }

    match dispatch.reply {
        None => builder.finish(),
        Some(reply) if wants_event_stream(&req) => {
            let event = Bytes::from(format!("event: message\ndata: {reply}\n\n"));
            builder
                .content_type("text/event-stream")
                // Disable caching and proxy buffering for event streams
                .insert_header(header::CacheControl(vec![
                    header::CacheDirective::NoCache,
                    header::CacheDirective::NoStore,
                ]))
                .insert_header(("x-accel-buffering", "no"))
                .streaming(futures_util::stream::once(async move {
                    Ok::<_, actix_web::Error>(event)
                }))
        }
        Some(reply) => builder.json(reply),
    }
}

/// Terminate a Streamable HTTP session.
///
/// # Returns
/// 204 when the session was live, 404 when it was never issued or already
/// expired, 400 without a session header.
async fn mcp_delete(state: web::Data<HttpState>, req: HttpRequest) -> HttpResponse {
    let Some(id) = session_id(&req) else {
        return HttpResponse::BadRequest().finish();
    };
    if state.sessions().close(id, Instant::now()) {
        tracing::info!(session = %id, "session closed");
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::NotFound().finish()
    }
}

/// Server-initiated streams are not offered.
async fn mcp_get() -> HttpResponse {
    HttpResponse::MethodNotAllowed()
        .insert_header((header::ALLOW, "POST, DELETE"))
        .finish()
}

/// Register the HTTP routes.
///
/// # Arguments
/// * `cfg` - Service config of an `App` that already carries
///   `web::Data<HttpState>` in its app data
///
/// `POST /` and `GET /` mirror `/mcp` and `/health` for clients configured
/// with a bare base URL.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/mcp", web::post().to(mcp_post))
        .route("/mcp", web::delete().to(mcp_delete))
        .route("/mcp", web::get().to(mcp_get))
        .route("/", web::post().to(mcp_post))
        .route("/", web::get().to(health));
}

/// Run the MCP server in Streamable HTTP mode.
///
/// # Configuration
/// - Worker threads: `config.workers`
/// - Sessions: expire after `config.session_idle`, at most `config.max_sessions`
/// - Max connections: 10,000 concurrent connections
/// - Connection rate limit: 1,000 connections per second
/// - Keep-alive: 30 seconds
/// - Request timeout: 30 seconds
/// - Shutdown timeout: 10 seconds
pub async fn run_server_http(config: &Config, server: Arc<McpServer>) -> std::io::Result<()> {
    use std::time::Duration;

    let bind_addr = config.bind_addr();
    let sessions = SessionStore::new(config.session_idle, config.max_sessions);
    let state = web::Data::new(HttpState::new(server, sessions));

    tracing::info!(
        name = %config.info.name,
        version = %config.info.version,
        bind = %bind_addr,
        workers = config.workers,
        max_sessions = config.max_sessions,
        "MCP server starting (Streamable HTTP mode)"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY")),
            )
            // Format: %r = request line, %s = status, %Dms = duration in milliseconds
            .wrap(Logger::new("%r %s %Dms"))
            .configure(routes)
    })
    .workers(config.workers)
    .max_connections(10000)
    .max_connection_rate(1000)
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&bind_addr)?
    .run()
    .await
}

/// Run the MCP server in STDIO mode.
///
/// Reads newline-delimited JSON-RPC from stdin and writes one response line
/// per request to stdout. Logging goes to stderr.
pub async fn run_server_stdio(server: Arc<McpServer>) -> std::io::Result<()> {
    use tokio::io::{BufReader, BufWriter};

    tracing::info!(
        name = %server.info().name,
        version = %server.info().version,
        "MCP server starting (STDIO mode)"
    );

    let stdin = BufReader::with_capacity(8192, tokio::io::stdin());
    let stdout = BufWriter::with_capacity(8192, tokio::io::stdout());
    serve_lines(server, stdin, stdout).await
}

/// Line-oriented request loop behind the STDIO transport.
///
/// Returns when the reader reaches EOF.
pub async fn serve_lines<R, W>(server: Arc<McpServer>, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let server = server.clone();
        let dispatch = match tokio::task::spawn_blocking(move || server.handle_payload(line.as_bytes())).await {
            Ok(dispatch) => dispatch,
            Err(e) => {
                tracing::error!(error = %e, "request dispatch failed");
                continue;
            }
        };

        if let Some(reply) = dispatch.reply {
            // Each response is a single line followed by newline, flushed immediately
            writer.write_all(reply.to_string().as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }

    tracing::info!("stdin closed, STDIO transport stopping");
    Ok(())
}
