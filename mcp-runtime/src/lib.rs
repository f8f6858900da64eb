use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use clap::{Args, Subcommand};
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use skybridge_core::config::RuntimeSettings;
use skybridge_core::error::codes;
use skybridge_core::spaces::SpaceRef;

pub mod bridge;
pub mod builtins;
pub mod cache;
pub mod discovery;
pub mod rewrite;
mod schema;
pub mod selection;
pub mod session;
mod util;

use bridge::{InvocationContext, ProgressRelay, ProgressSendError, ProgressSink, UpstreamCall};
use builtins::{TOOL_SPACE_INVOKE, execute_builtin};
use cache::SpaceCache;
use discovery::{discover_spaces, refresh_metadata};
use schema::{SchemaComplexity, classify_schema};
use selection::{
    HeaderOverrides, SettingsSource, ToolSelection, UserSettings, resolve_tool_selection,
};
use session::{CallableTool, Session, ToolBackend, build_catalogue};
use util::{client, resolve_token, token_fingerprint};

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const MCP_SERVER_NAME: &str = "skybridge-mcp";

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the aggregating MCP server over stdio
    Serve(McpServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct McpServeArgs {
    /// Explicit bearer token override (otherwise DEFAULT_HF_TOKEN)
    #[arg(long, env = "HF_TOKEN")]
    pub token: Option<String>,
    /// Tool preset overriding stored settings (X-MCP-Bouquet equivalent)
    #[arg(long, env = "MCP_BOUQUET")]
    pub bouquet: Option<String>,
    /// Additive tool presets (X-MCP-Mix equivalent)
    #[arg(long, env = "MCP_MIX", value_delimiter = ',')]
    pub mix: Vec<String>,
    /// Extra gradio spaces as owner/name refs (X-MCP-Gradio equivalent)
    #[arg(long, env = "MCP_GRADIO", value_delimiter = ',')]
    pub gradio: Vec<String>,
    /// Settings bundle file: JSON with "tools" and "spaces" arrays
    #[arg(long)]
    pub settings: Option<std::path::PathBuf>,
}

pub async fn run(command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve(args) => {
            let config = McpRuntimeConfig::from_serve_args(args);
            let server = Arc::new(McpServer::new(config));
            server.emit_startup_status();
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
    }
}

/// Per-request configuration for an embedding HTTP transport. The transport
/// itself lives elsewhere; it extracts the bearer token and the X-MCP-*
/// headers and hands the raw JSON-RPC body to `handle_http_jsonrpc`.
#[derive(Clone, Debug, Default)]
pub struct HttpMcpRequestConfig {
    pub token: Option<String>,
    pub bouquet: Option<String>,
    pub mix: Vec<String>,
    pub gradio: Vec<String>,
    pub user_settings: Option<UserSettings>,
}

pub async fn handle_http_jsonrpc(config: HttpMcpRequestConfig, incoming: Value) -> Vec<Value> {
    let source = if config.user_settings.is_some() {
        SettingsSource::CallerSupplied
    } else {
        SettingsSource::None
    };
    let runtime_config = McpRuntimeConfig {
        settings: RuntimeSettings::from_env(),
        explicit_token: config.token,
        overrides: HeaderOverrides {
            bouquet: config.bouquet,
            mix: config.mix,
            gradio: parse_space_refs(&config.gradio),
        },
        user_settings: config.user_settings,
        settings_source: source,
    };
    let server = McpServer::new(runtime_config);
    server.handle_incoming_message(incoming).await
}

#[derive(Clone, Debug)]
pub struct McpRuntimeConfig {
    pub settings: RuntimeSettings,
    pub explicit_token: Option<String>,
    pub overrides: HeaderOverrides,
    pub user_settings: Option<UserSettings>,
    pub settings_source: SettingsSource,
}

impl McpRuntimeConfig {
    fn from_serve_args(args: McpServeArgs) -> Self {
        let user_settings = args.settings.as_ref().and_then(|path| {
            match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<UserSettings>(&raw) {
                    Ok(settings) => Some(settings),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "ignoring unparseable settings bundle");
                        None
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable settings bundle");
                    None
                }
            }
        });
        let settings_source = if user_settings.is_some() {
            SettingsSource::CallerSupplied
        } else {
            SettingsSource::None
        };
        Self {
            settings: RuntimeSettings::from_env(),
            explicit_token: args.token,
            overrides: HeaderOverrides {
                bouquet: args.bouquet,
                mix: args.mix,
                gradio: parse_space_refs(&args.gradio),
            },
            user_settings,
            settings_source,
        }
    }
}

fn parse_space_refs(raw: &[String]) -> Vec<SpaceRef> {
    raw.iter()
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| match SpaceRef::parse(s) {
            Ok(space_ref) => Some(space_ref),
            Err(e) => {
                warn!(error = %e, "ignoring invalid gradio space ref");
                None
            }
        })
        .collect()
}

pub struct McpServer {
    config: McpRuntimeConfig,
    http: reqwest::Client,
    cache: SpaceCache,
    session: Session,
    outbound: Mutex<Option<UnboundedSender<Value>>>,
    inflight: Mutex<HashMap<String, CancellationToken>>,
}

impl McpServer {
    pub fn new(config: McpRuntimeConfig) -> Self {
        let cache = SpaceCache::new(
            config.settings.space_cache_ttl,
            config.settings.schema_cache_ttl,
        );
        let session = Session::new(format!("sb-{}", Uuid::now_v7().simple()));
        Self {
            config,
            http: client(),
            cache,
            session,
            outbound: Mutex::new(None),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn emit_startup_status(&self) {
        let token = resolve_token(self.config.explicit_token.as_deref(), &self.config.settings);
        let payload = json!({
            "event": "mcp_startup",
            "server": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": chrono::Utc::now(),
            "session": self.session.session_id(),
            "hub_url": self.config.settings.hub_url,
            "token": token.as_deref().map(token_fingerprint),
            "bouquet": self.config.overrides.bouquet,
            "mix": self.config.overrides.mix,
            "gradio_spaces": self.config.overrides.gradio.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            "settings_source": self.config.settings_source.as_str(),
        });
        eprintln!("{}", to_pretty_json(&payload));
    }

    pub async fn serve_stdio(self: &Arc<Self>) -> Result<(), String> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx.clone());
        self.session.set_listener(tx.clone());

        let writer = tokio::spawn(async move {
            let mut stdout = io::stdout();
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_framed_json(&mut stdout, &frame).await {
                    warn!(error = %e, "failed to write MCP frame; stopping writer");
                    break;
                }
            }
        });

        let stdin = io::stdin();
        let mut reader = BufReader::new(stdin);
        let outcome = loop {
            let incoming = match read_framed_json(&mut reader).await {
                Ok(Some(incoming)) => incoming,
                Ok(None) => break Ok(()),
                Err(e) => break Err(format!("Failed to read MCP message: {e}")),
            };
            let server = Arc::clone(self);
            let tx = tx.clone();
            tokio::spawn(async move {
                for response in server.handle_incoming_message(incoming).await {
                    let _ = tx.send(response);
                }
            });
        };

        // Transport is gone: cancel every in-flight upstream call, then let
        // the writer drain.
        self.cancel_all_inflight();
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = None;
        drop(tx);
        let _ = writer.await;
        outcome
    }

    pub async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        // A batch unrolls into its members; anything else is a batch of one.
        let frames: Vec<Value> = match incoming {
            Value::Array(batch) if batch.is_empty() => {
                return vec![error_response(
                    Value::Null,
                    RpcError::invalid_request("a batch needs at least one request"),
                )];
            }
            Value::Array(batch) => batch,
            single => vec![single],
        };

        let mut responses = Vec::with_capacity(frames.len());
        for frame in frames {
            if let Some(response) = self.handle_single_message(frame).await {
                responses.push(response);
            }
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Value::Object(frame) = incoming else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("expected a JSON-RPC object"),
            ));
        };

        let id = frame.get("id").cloned();
        if frame.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Some(error_response(
                id.unwrap_or(Value::Null),
                RpcError::invalid_request("unsupported jsonrpc version"),
            ));
        }

        let Some(method) = frame.get("method").and_then(Value::as_str).map(String::from) else {
            // No method: a response frame. This server only sends
            // notifications upstream, so there is nothing to correlate.
            return None;
        };
        let params = frame.get("params").cloned().unwrap_or(Value::Null);

        match id {
            Some(id) => match self.handle_request(&method, params, &id).await {
                Ok(Some(payload)) => Some(success_response(id, payload)),
                // A cancelled invocation produces no response frame.
                Ok(None) => None,
                Err(err) => Some(error_response(id, err)),
            },
            None => {
                self.handle_notification(&method, params).await;
                None
            }
        }
    }

    async fn handle_notification(&self, method: &str, params: Value) {
        match method {
            "notifications/initialized" => {}
            "notifications/cancelled" => {
                let Some(request_id) = params.get("requestId") else {
                    return;
                };
                self.cancel_inflight(&request_key(request_id));
            }
            // Unknown notifications are intentionally ignored.
            _ => {}
        }
    }

    async fn handle_request(
        &self,
        method: &str,
        params: Value,
        id: &Value,
    ) -> Result<Option<Value>, RpcError> {
        match method {
            "initialize" => Ok(Some(self.initialize_payload(&params))),
            "ping" => Ok(Some(json!({}))),
            "tools/list" => {
                self.ensure_catalogue().await;
                Ok(Some(self.session.tools_list_payload()))
            }
            "tools/call" => self.handle_tools_call(params, id).await,
            "prompts/list" => Ok(Some(json!({ "prompts": [] }))),
            "resources/list" => Ok(Some(json!({ "resources": [] }))),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self, params: &Value) -> Value {
        self.session
            .set_client_info(params.get("clientInfo").cloned());
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    // The catalogue is dynamic; the capability is declared
                    // explicitly rather than inherited from an SDK default.
                    "listChanged": true
                },
                "prompts": { "listChanged": false },
                "resources": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Built-in hub_* and hf_* tools call the Hugging Face Hub directly. Tools prefixed gr<N>_ (gr<N>p_ for private spaces) proxy to Gradio spaces; space_invoke runs a space tool in one shot when its parameters are all primitives."
        })
    }

    /// Build the session catalogue on first use: resolve the selection,
    /// discover the selected spaces, and install the result.
    async fn ensure_catalogue(&self) {
        if self.session.is_built() {
            return;
        }
        let selection = self.resolve_selection();
        let token = self.bearer_token();
        let outcomes = discover_spaces(
            &self.http,
            &self.config.settings,
            &self.cache,
            &selection.spaces,
            token.as_deref(),
        )
        .await;
        let catalogue = build_catalogue(&selection, &outcomes);
        info!(
            session = %self.session.session_id(),
            builtins = selection.builtin_ids.len(),
            spaces = selection.spaces.len(),
            tools = catalogue.len(),
            settings_source = self.config.settings_source.as_str(),
            "session catalogue built"
        );
        self.session.install_catalogue(catalogue);
    }

    fn resolve_selection(&self) -> ToolSelection {
        resolve_tool_selection(
            &self.config.overrides,
            self.config.user_settings.as_ref(),
            self.config.settings_source,
            self.config.settings.search_enables_fetch,
        )
    }

    fn bearer_token(&self) -> Option<String> {
        resolve_token(self.config.explicit_token.as_deref(), &self.config.settings)
    }

    async fn handle_tools_call(
        &self,
        params: Value,
        id: &Value,
    ) -> Result<Option<Value>, RpcError> {
        // Legacy tool names and argument shapes are canonicalised before
        // anything else looks at the request.
        let (params, rewrite_report) = rewrite::rewrite_legacy_call(&params);
        if let Some(report) = &rewrite_report {
            debug!(
                legacy = %report.legacy_name,
                canonical = %report.canonical_name,
                "rewrote legacy tool call"
            );
        }

        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;
        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };
        let progress_token = params
            .get("_meta")
            .and_then(|meta| meta.get("progressToken"))
            .filter(|token| !token.is_null())
            .cloned();

        self.ensure_catalogue().await;

        let tool = self
            .session
            .lookup(name)
            .filter(|tool| tool.enabled)
            .ok_or_else(|| RpcError::invalid_params(format!("Tool not found: {name}")))?;

        let cancel = CancellationToken::new();
        let key = request_key(id);
        self.register_inflight(&key, cancel.clone());
        let progress = progress_token.and_then(|token| {
            self.progress_sink()
                .map(|sink| ProgressRelay::new(sink, token))
        });
        let mut ctx = InvocationContext::new(progress, cancel);

        let outcome = self.dispatch_tool(&tool, args, &mut ctx).await;
        self.remove_inflight(&key);

        match outcome {
            Ok(payload) => Ok(Some(payload)),
            Err(err) if err.code == codes::CANCELLED && ctx.cancel.is_cancelled() => Ok(None),
            Err(err) => Ok(Some(tool_error_payload(&tool.outward_name, &err))),
        }
    }

    async fn dispatch_tool(
        &self,
        tool: &CallableTool,
        args: Map<String, Value>,
        ctx: &mut InvocationContext,
    ) -> Result<Value, ToolError> {
        let token = self.bearer_token();
        match &tool.backend {
            ToolBackend::BuiltIn { id } if id.as_str() == TOOL_SPACE_INVOKE => {
                self.handle_space_invoke(&args, ctx).await
            }
            ToolBackend::BuiltIn { id } => {
                let payload = execute_builtin(
                    id,
                    &args,
                    &self.http,
                    &self.config.settings,
                    token.as_deref(),
                )
                .await?;
                Ok(tool_success_payload(&payload))
            }
            ToolBackend::Dynamic {
                space_ref,
                subdomain,
                tool_name,
                ..
            } => {
                // Cached metadata may have gone stale under an active
                // catalogue entry; refresh just this ref before dispatch.
                let subdomain = match refresh_metadata(
                    &self.http,
                    &self.config.settings,
                    &self.cache,
                    space_ref,
                    token.as_deref(),
                )
                .await
                {
                    Some(metadata) => metadata.subdomain,
                    None => subdomain.clone(),
                };
                bridge::call_space_tool(
                    &self.http,
                    &self.config.settings,
                    UpstreamCall {
                        subdomain: &subdomain,
                        tool_name,
                        arguments: Value::Object(args),
                        bearer_token: token.as_deref(),
                    },
                    ctx,
                )
                .await
            }
        }
    }

    /// One-shot invocation of a space tool with flat JSON-string parameters.
    async fn handle_space_invoke(
        &self,
        args: &Map<String, Value>,
        ctx: &mut InvocationContext,
    ) -> Result<Value, ToolError> {
        let space_raw = required_string(args, "space")?;
        let space_ref = SpaceRef::parse(&space_raw).map_err(|e| {
            ToolError::new(codes::VALIDATION_FAILED, e.to_string()).with_field("space")
        })?;
        let parameters_raw = required_string(args, "parameters")?;
        let parameters: Value = serde_json::from_str(&parameters_raw).map_err(|e| {
            ToolError::new(
                codes::INVALID_JSON,
                format!("'parameters' is not valid JSON: {e}"),
            )
            .with_field("parameters")
            .with_docs_hint("Pass a JSON object string, e.g. {\"prompt\": \"a cat wearing a hat\"}")
        })?;
        if !parameters.is_object() {
            return Err(ToolError::new(
                codes::INVALID_JSON,
                "'parameters' must encode a JSON object",
            )
            .with_field("parameters")
            .with_docs_hint("Pass a JSON object string, e.g. {\"prompt\": \"a cat wearing a hat\"}"));
        }

        let token = self.bearer_token();
        let refs = vec![space_ref.clone()];
        let outcomes = discover_spaces(
            &self.http,
            &self.config.settings,
            &self.cache,
            &refs,
            token.as_deref(),
        )
        .await;
        let outcome = outcomes.into_iter().next().ok_or_else(|| {
            ToolError::new(codes::SPACE_UNAVAILABLE, "discovery returned no outcome")
        })?;
        let (metadata, tools) = match (outcome.metadata, outcome.tools) {
            (Some(metadata), Some(tools)) => (metadata, tools),
            _ => {
                return Err(ToolError::new(
                    codes::SPACE_UNAVAILABLE,
                    outcome
                        .error
                        .unwrap_or_else(|| format!("{space_ref} exposes no callable tools")),
                )
                .with_field("space"));
            }
        };

        let requested = arg_optional_string(args, "tool")?;
        let descriptor = match &requested {
            Some(tool_name) => tools.iter().find(|t| &t.name == tool_name).ok_or_else(|| {
                ToolError::new(
                    codes::VALIDATION_FAILED,
                    format!("{space_ref} has no tool named '{tool_name}'"),
                )
                .with_field("tool")
                .with_details(json!({
                    "available": tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>()
                }))
            })?,
            None if tools.len() == 1 => &tools[0],
            None => {
                return Err(ToolError::new(
                    codes::VALIDATION_FAILED,
                    format!("{space_ref} exposes several tools; pass 'tool'"),
                )
                .with_field("tool")
                .with_details(json!({
                    "available": tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>()
                })));
            }
        };

        if classify_schema(&descriptor.input_schema) == SchemaComplexity::Complex {
            let passthrough = self
                .passthrough_name(&space_ref, &descriptor.name)
                .unwrap_or_else(|| format!("the space's gr*_{} tool", descriptor.name));
            return Err(ToolError::new(
                codes::COMPLEX_SCHEMA,
                format!(
                    "'{}' takes nested parameters that space_invoke cannot express",
                    descriptor.name
                ),
            )
            .with_docs_hint(format!("Call {passthrough} with structured arguments instead."))
            .with_details(json!({ "inputSchema": descriptor.input_schema })));
        }

        bridge::call_space_tool(
            &self.http,
            &self.config.settings,
            UpstreamCall {
                subdomain: &metadata.subdomain,
                tool_name: &descriptor.name,
                arguments: parameters,
                bearer_token: token.as_deref(),
            },
            ctx,
        )
        .await
    }

    /// Outward name of the passthrough tool for a space tool, when the space
    /// is part of the active catalogue.
    fn passthrough_name(&self, space_ref: &SpaceRef, tool_name: &str) -> Option<String> {
        let listed = self.session.tools_list_payload();
        let tools = listed.get("tools")?.as_array()?.clone();
        for tool in tools {
            let name = tool.get("name").and_then(Value::as_str)?;
            if let Some(entry) = self.session.lookup(name) {
                if let ToolBackend::Dynamic {
                    space_ref: entry_ref,
                    tool_name: entry_tool,
                    ..
                } = entry.backend
                {
                    if &entry_ref == space_ref && entry_tool == tool_name {
                        return Some(entry.outward_name);
                    }
                }
            }
        }
        None
    }

    fn progress_sink(&self) -> Option<Arc<dyn ProgressSink>> {
        let guard = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|tx| Arc::new(ChannelSink(tx.clone())) as Arc<dyn ProgressSink>)
    }

    fn register_inflight(&self, key: &str, token: CancellationToken) {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), token);
    }

    fn remove_inflight(&self, key: &str) {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    fn cancel_inflight(&self, key: &str) {
        let token = self
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        if let Some(token) = token {
            debug!(request = %key, "cancelling in-flight invocation");
            token.cancel();
        }
    }

    fn cancel_all_inflight(&self) {
        let tokens: Vec<CancellationToken> = self
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, token)| token)
            .collect();
        for token in tokens {
            token.cancel();
        }
    }
}

/// Progress frames ride the same outbound channel as responses, which keeps
/// them FIFO per invocation without blocking the upstream call.
struct ChannelSink(UnboundedSender<Value>);

impl ProgressSink for ChannelSink {
    fn send_frame(&self, frame: Value) -> Result<(), ProgressSendError> {
        self.0.send(frame).map_err(|_| ProgressSendError)
    }
}

fn request_key(id: &Value) -> String {
    id.to_string()
}

fn tool_success_payload(payload: &Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": to_pretty_json(payload) }],
        "structuredContent": payload
    })
}

fn tool_error_payload(tool: &str, err: &ToolError) -> Value {
    let body = err.to_value();
    let envelope = json!({
        "tool": tool,
        "error": body
    });
    json!({
        "isError": true,
        "content": [{ "type": "text", "text": to_pretty_json(&envelope) }],
        "structuredContent": envelope
    })
}

#[derive(Debug)]
pub(crate) struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }
}

/// Structured tool-execution error, rendered into an `isError` result.
#[derive(Debug, Clone)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
    pub docs_hint: Option<String>,
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload["docs_hint"] = Value::String(docs_hint.clone());
        }
        if let Some(details) = &self.details {
            payload["details"] = details.clone();
        }
        payload
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

pub(crate) fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let value = args.get(key).ok_or_else(|| {
        ToolError::new(
            codes::VALIDATION_FAILED,
            format!("Missing required field '{key}'"),
        )
        .with_field(key)
    })?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.clone()),
        Value::String(_) => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must not be empty"),
        )
        .with_field(key)),
        _ => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must be a string"),
        )
        .with_field(key)),
    }
}

pub(crate) fn arg_optional_string(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.clone())),
        Some(_) => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must be a string"),
        )
        .with_field(key)),
    }
}

pub(crate) fn arg_optional_u64(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<u64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| {
                ToolError::new(
                    codes::VALIDATION_FAILED,
                    format!("'{key}' must be an unsigned integer"),
                )
                .with_field(key)
            })
            .map(Some),
        Some(_) => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must be an unsigned integer"),
        )
        .with_field(key)),
    }
}

pub(crate) fn arg_optional_string_array(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<Vec<String>>, ToolError> {
    let Some(value) = args.get(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let items = value.as_array().ok_or_else(|| {
        ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must be an array of strings"),
        )
        .with_field(key)
    })?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let text = item.as_str().ok_or_else(|| {
            ToolError::new(
                codes::VALIDATION_FAILED,
                format!("'{key}' items must be strings"),
            )
            .with_field(key)
        })?;
        let normalized = text.trim();
        if !normalized.is_empty() {
            out.push(normalized.to_string());
        }
    }
    Ok(Some(out))
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

/// Read one Content-Length framed frame from the transport. `Ok(None)` is a
/// clean EOF between frames; EOF inside a header block is an error.
async fn read_framed_json(
    reader: &mut BufReader<tokio::io::Stdin>,
) -> Result<Option<Value>, std::io::Error> {
    let mut body_len: Option<usize> = None;
    let mut header = String::new();

    loop {
        header.clear();
        if reader.read_line(&mut header).await? == 0 {
            return match body_len {
                None => Ok(None),
                Some(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "transport closed inside a frame header block",
                )),
            };
        }
        let trimmed = header.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        let Some((name, value)) = trimmed.split_once(':') else {
            continue;
        };
        if name.eq_ignore_ascii_case("content-length") {
            body_len = Some(
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| framing_error("Content-Length is not a number"))?,
            );
        }
    }

    let body_len =
        body_len.ok_or_else(|| framing_error("frame headers carry no Content-Length"))?;
    let mut body = vec![0_u8; body_len];
    reader.read_exact(&mut body).await?;

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| framing_error(&format!("frame body is not valid JSON: {e}")))
}

async fn write_framed_json(
    writer: &mut tokio::io::Stdout,
    frame: &Value,
) -> Result<(), std::io::Error> {
    let body = serde_json::to_vec(frame)
        .map_err(|e| framing_error(&format!("frame failed to serialize: {e}")))?;
    writer
        .write_all(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes())
        .await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

fn framing_error(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message.to_string())
}

pub(crate) fn to_pretty_json(value: &Value) -> String {
    match serde_json::to_string_pretty(value) {
        Ok(text) => text,
        Err(_) => String::from("{}"),
    }
}
