use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use skybridge_core::config::RuntimeSettings;
use skybridge_core::error::codes;

use crate::ToolError;

/// Handshake deadline for the endpoint event and the initialize response.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
/// Inactivity deadline on the tools/call wait; reset on every progress
/// notification so long-running but progressing calls survive.
const CALL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Response headers the bridge captures from every upstream HTTP response.
const CAPTURED_HEADERS: &[&str] = &["x-proxied-replica"];

const REPLICA_HEADER: &str = "x-proxied-replica";

/// Per-call state threaded from the transport into the bridge.
pub struct InvocationContext {
    pub progress: Option<ProgressRelay>,
    pub cancel: CancellationToken,
    pub captured_headers: BTreeMap<String, String>,
}

impl InvocationContext {
    pub fn new(progress: Option<ProgressRelay>, cancel: CancellationToken) -> Self {
        Self {
            progress,
            cancel,
            captured_headers: BTreeMap::new(),
        }
    }
}

/// Downstream notification sender, abstracted so the relay can be driven in
/// tests and nulled out on transports without a notification channel.
pub trait ProgressSink: Send + Sync {
    fn send_frame(&self, frame: Value) -> Result<(), ProgressSendError>;
}

#[derive(Debug)]
pub struct ProgressSendError;

/// Relays upstream progress notifications downstream.
///
/// Fire-and-forget and FIFO per invocation. The first failed send latches the
/// relay into a disabled state for the rest of the invocation: the failed
/// notification is not retried and later ones are not attempted.
pub struct ProgressRelay {
    sink: Arc<dyn ProgressSink>,
    progress_token: Value,
    disabled: AtomicBool,
}

impl ProgressRelay {
    pub fn new(sink: Arc<dyn ProgressSink>, progress_token: Value) -> Self {
        Self {
            sink,
            progress_token,
            disabled: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> &Value {
        &self.progress_token
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    fn relay(&self, upstream_params: &Value) {
        if self.is_disabled() {
            return;
        }
        let mut params = json!({ "progressToken": self.progress_token });
        for key in ["progress", "total", "message"] {
            if let Some(value) = upstream_params.get(key) {
                if !value.is_null() {
                    params[key] = value.clone();
                }
            }
        }
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "notifications/progress",
            "params": params
        });
        if self.sink.send_frame(frame).is_err() {
            self.disabled.store(true, Ordering::Release);
            debug!("progress relay failed; disabling relay for this invocation");
        }
    }
}

/// One upstream tool call.
pub struct UpstreamCall<'a> {
    pub subdomain: &'a str,
    pub tool_name: &'a str,
    pub arguments: Value,
    pub bearer_token: Option<&'a str>,
}

/// Call one tool on one space over a transient SSE client.
///
/// The client lives inside this function: the event stream and message URL
/// are dropped on every exit path, success or not. No retries; upstream
/// errors surface verbatim.
pub async fn call_space_tool(
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    call: UpstreamCall<'_>,
    ctx: &mut InvocationContext,
) -> Result<Value, ToolError> {
    let base_url = format!("https://{}.hf.space", call.subdomain);
    let sse_url = format!("{base_url}/gradio_api/mcp/sse");

    let mut request = http.get(&sse_url).header("Accept", "text/event-stream");
    if let Some(token) = call.bearer_token {
        request = request.header("X-HF-Authorization", format!("Bearer {token}"));
    }
    let response = request.send().await.map_err(|e| {
        ToolError::new(
            codes::CONNECTION_ERROR,
            format!("Failed to open SSE stream at {sse_url}: {e}"),
        )
    })?;
    if !response.status().is_success() {
        return Err(ToolError::new(
            codes::UPSTREAM_ERROR,
            format!(
                "SSE endpoint returned HTTP {} for {sse_url}",
                response.status().as_u16()
            ),
        ));
    }
    capture_headers(response.headers(), &mut ctx.captured_headers);

    let mut sse = SseStream::new(response);

    // The first event names the session-scoped message endpoint.
    let endpoint = timeout(HANDSHAKE_TIMEOUT, wait_for_endpoint(&mut sse))
        .await
        .map_err(|_| handshake_timeout("endpoint event"))??;
    let message_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint
    } else if endpoint.starts_with('/') {
        format!("{base_url}{endpoint}")
    } else {
        format!("{base_url}/{endpoint}")
    };
    trace!(message_url = %message_url, "upstream SSE session established");

    post_frame(
        http,
        &message_url,
        call.bearer_token,
        &json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": crate::MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": crate::MCP_SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }
        }),
        &mut ctx.captured_headers,
    )
    .await?;
    timeout(HANDSHAKE_TIMEOUT, wait_for_response(&mut sse, 0))
        .await
        .map_err(|_| handshake_timeout("initialize response"))??;

    post_frame(
        http,
        &message_url,
        call.bearer_token,
        &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        &mut ctx.captured_headers,
    )
    .await?;

    let mut call_params = json!({
        "name": call.tool_name,
        "arguments": call.arguments
    });
    if let Some(progress) = &ctx.progress {
        call_params["_meta"] = json!({ "progressToken": progress.token() });
    }
    post_frame(
        http,
        &message_url,
        call.bearer_token,
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": call_params }),
        &mut ctx.captured_headers,
    )
    .await?;

    let outcome = await_call_result(&mut sse, ctx).await;

    match outcome {
        CallOutcome::Result(mut result) => {
            postprocess_result(
                &mut result,
                &ctx.captured_headers,
                settings.replica_rewrite_disabled,
            );
            Ok(result)
        }
        CallOutcome::RpcError(error) => Err(ToolError::new(
            codes::UPSTREAM_ERROR,
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream returned a protocol error")
                .to_string(),
        )
        .with_details(error)),
        CallOutcome::Cancelled => {
            // Best-effort upstream cancellation; the client is closing either way.
            let http = http.clone();
            let message_url = message_url.clone();
            let token = call.bearer_token.map(ToOwned::to_owned);
            tokio::spawn(async move {
                let frame = json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/cancelled",
                    "params": { "requestId": 1 }
                });
                let mut request = http.post(&message_url).json(&frame);
                if let Some(token) = token {
                    request = request.header("X-HF-Authorization", format!("Bearer {token}"));
                }
                let _ = request.send().await;
            });
            Err(ToolError::new(codes::CANCELLED, "Invocation cancelled"))
        }
        CallOutcome::Timeout => Err(ToolError::new(
            codes::UPSTREAM_TIMEOUT,
            format!(
                "Upstream call showed no activity for {} s",
                CALL_IDLE_TIMEOUT.as_secs()
            ),
        )),
        CallOutcome::TransportError(message) => {
            Err(ToolError::new(codes::UPSTREAM_ERROR, message))
        }
    }
}

enum CallOutcome {
    Result(Value),
    RpcError(Value),
    Cancelled,
    Timeout,
    TransportError(String),
}

/// Wait for the tools/call response while relaying progress notifications.
///
/// The idle deadline resets on every progress receipt. Cancellation stops
/// the relay and wins over everything else.
async fn await_call_result(sse: &mut SseStream, ctx: &InvocationContext) -> CallOutcome {
    let idle = tokio::time::sleep(CALL_IDLE_TIMEOUT);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return CallOutcome::Cancelled,
            _ = &mut idle => return CallOutcome::Timeout,
            event = sse.next_event() => {
                let event = match event {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        return CallOutcome::TransportError(
                            "upstream closed the SSE stream before responding".to_string(),
                        );
                    }
                    Err(e) => return CallOutcome::TransportError(e),
                };
                let Ok(frame) = serde_json::from_str::<Value>(&event.data) else {
                    continue;
                };
                if frame.get("method").and_then(Value::as_str)
                    == Some("notifications/progress")
                {
                    idle.as_mut().reset(tokio::time::Instant::now() + CALL_IDLE_TIMEOUT);
                    if !ctx.cancel.is_cancelled() {
                        if let Some(progress) = &ctx.progress {
                            if let Some(params) = frame.get("params") {
                                progress.relay(params);
                            }
                        }
                    }
                    continue;
                }
                if frame.get("id").and_then(Value::as_i64) == Some(1) {
                    if let Some(error) = frame.get("error") {
                        return CallOutcome::RpcError(error.clone());
                    }
                    return CallOutcome::Result(
                        frame.get("result").cloned().unwrap_or(Value::Null),
                    );
                }
            }
        }
    }
}

fn handshake_timeout(stage: &str) -> ToolError {
    ToolError::new(
        codes::UPSTREAM_TIMEOUT,
        format!(
            "Timed out waiting for {stage} after {} s",
            HANDSHAKE_TIMEOUT.as_secs()
        ),
    )
}

async fn wait_for_endpoint(sse: &mut SseStream) -> Result<String, ToolError> {
    loop {
        match sse.next_event().await {
            Ok(Some(event)) if event.name == "endpoint" => {
                let data = event.data.trim().to_string();
                if data.is_empty() {
                    return Err(ToolError::new(
                        codes::UPSTREAM_ERROR,
                        "upstream sent an empty endpoint event",
                    ));
                }
                return Ok(data);
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                return Err(ToolError::new(
                    codes::UPSTREAM_ERROR,
                    "upstream closed the SSE stream during the handshake",
                ));
            }
            Err(e) => return Err(ToolError::new(codes::UPSTREAM_ERROR, e)),
        }
    }
}

async fn wait_for_response(sse: &mut SseStream, id: i64) -> Result<Value, ToolError> {
    loop {
        match sse.next_event().await {
            Ok(Some(event)) => {
                let Ok(frame) = serde_json::from_str::<Value>(&event.data) else {
                    continue;
                };
                if frame.get("id").and_then(Value::as_i64) == Some(id) {
                    if let Some(error) = frame.get("error") {
                        return Err(ToolError::new(
                            codes::UPSTREAM_ERROR,
                            error
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or("upstream protocol error")
                                .to_string(),
                        )
                        .with_details(error.clone()));
                    }
                    return Ok(frame.get("result").cloned().unwrap_or(Value::Null));
                }
            }
            Ok(None) => {
                return Err(ToolError::new(
                    codes::UPSTREAM_ERROR,
                    "upstream closed the SSE stream during the handshake",
                ));
            }
            Err(e) => return Err(ToolError::new(codes::UPSTREAM_ERROR, e)),
        }
    }
}

/// POST one JSON-RPC frame to the session's message endpoint, capturing
/// interesting response headers.
async fn post_frame(
    http: &reqwest::Client,
    message_url: &str,
    bearer_token: Option<&str>,
    frame: &Value,
    captured: &mut BTreeMap<String, String>,
) -> Result<(), ToolError> {
    let mut request = http
        .post(message_url)
        .header("Content-Type", "application/json")
        .json(frame);
    if let Some(token) = bearer_token {
        request = request.header("X-HF-Authorization", format!("Bearer {token}"));
    }
    let response = request.send().await.map_err(|e| {
        ToolError::new(
            codes::CONNECTION_ERROR,
            format!("Failed to POST to upstream message endpoint: {e}"),
        )
    })?;
    capture_headers(response.headers(), captured);
    if !response.status().is_success() {
        return Err(ToolError::new(
            codes::UPSTREAM_ERROR,
            format!(
                "upstream message endpoint returned HTTP {}",
                response.status().as_u16()
            ),
        ));
    }
    Ok(())
}

fn capture_headers(headers: &reqwest::header::HeaderMap, captured: &mut BTreeMap<String, String>) {
    for name in CAPTURED_HEADERS {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            captured.insert((*name).to_string(), value.to_string());
        }
    }
}

/// Replica URL rewrite plus captured-header echo.
///
/// The rewrite pins follow-up file downloads to the backend replica that
/// produced them; `NO_REPLICA_REWRITE` disables it wholesale. Headers are
/// attached to `_meta.responseHeaders` whenever any were captured.
pub(crate) fn postprocess_result(
    result: &mut Value,
    captured: &BTreeMap<String, String>,
    rewrite_disabled: bool,
) {
    if !rewrite_disabled {
        if let Some(replica_id) = captured
            .get(REPLICA_HEADER)
            .and_then(|raw| extract_replica_id(raw))
        {
            rewrite_replica_urls(result, &replica_id);
        }
    }
    if !captured.is_empty() {
        let meta = result
            .as_object_mut()
            .map(|obj| obj.entry("_meta").or_insert_with(|| json!({})));
        if let Some(meta) = meta {
            meta["responseHeaders"] = json!(captured);
        }
    }
}

/// `<x>-<replica_id>` → `replica_id`; headers without a `-` carry no
/// replica routing information.
pub(crate) fn extract_replica_id(header: &str) -> Option<String> {
    if !header.contains('-') {
        return None;
    }
    header
        .split('-')
        .rev()
        .find(|segment| !segment.is_empty())
        .map(ToOwned::to_owned)
}

/// Rewrite `https://<host>/gradio_api…` to
/// `https://<host>/--replicas/<id>/gradio_api…` in every text content item.
/// Non-text items are untouched; text items are only replaced when a
/// rewrite actually happened, so the operation is idempotent.
pub(crate) fn rewrite_replica_urls(result: &mut Value, replica_id: &str) -> usize {
    let Some(content) = result.get_mut("content").and_then(Value::as_array_mut) else {
        return 0;
    };
    let mut rewritten = 0;
    for item in content {
        if item.get("type").and_then(Value::as_str) != Some("text") {
            continue;
        }
        let Some(text) = item.get("text").and_then(Value::as_str) else {
            continue;
        };
        if let Some(updated) = rewrite_text(text, replica_id) {
            item["text"] = Value::String(updated);
            rewritten += 1;
        }
    }
    rewritten
}

fn rewrite_text(text: &str, replica_id: &str) -> Option<String> {
    const SCHEME: &str = "https://";
    const API_PATH: &str = "/gradio_api";

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut changed = false;

    while let Some(found) = text[cursor..].find(SCHEME) {
        let host_start = cursor + found + SCHEME.len();
        let host_len = text[host_start..]
            .find('/')
            .unwrap_or(text.len() - host_start);
        let path_start = host_start + host_len;
        out.push_str(&text[cursor..path_start]);
        if host_len > 0 && text[path_start..].starts_with(API_PATH) {
            out.push_str("/--replicas/");
            out.push_str(replica_id);
            changed = true;
        }
        cursor = path_start;
        if cursor >= text.len() {
            break;
        }
    }
    if !changed {
        return None;
    }
    out.push_str(&text[cursor..]);
    Some(out)
}

/// Incremental SSE framing over a reqwest byte stream.
struct SseStream {
    inner: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: String,
    event_name: Option<String>,
    data_lines: Vec<String>,
    ready: std::collections::VecDeque<SseEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    name: String,
    data: String,
}

impl SseStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            inner: response.bytes_stream().boxed(),
            buffer: String::new(),
            event_name: None,
            data_lines: Vec::new(),
            ready: std::collections::VecDeque::new(),
        }
    }

    /// Next complete SSE event; `Ok(None)` when upstream closed the stream.
    async fn next_event(&mut self) -> Result<Option<SseEvent>, String> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Ok(Some(event));
            }
            match self.inner.next().await {
                Some(Ok(chunk)) => {
                    self.feed(&String::from_utf8_lossy(&chunk));
                }
                Some(Err(e)) => return Err(format!("SSE stream error: {e}")),
                None => {
                    // A final event without a trailing blank line still counts.
                    self.flush_pending();
                    return Ok(self.ready.pop_front());
                }
            }
        }
    }

    fn feed(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                self.flush_pending();
            } else if let Some(name) = line.strip_prefix("event:") {
                self.event_name = Some(name.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.trim_start().to_string());
            }
            // Comment lines (`:`) and unknown fields are ignored.
        }
    }

    fn flush_pending(&mut self) {
        if self.data_lines.is_empty() && self.event_name.is_none() {
            return;
        }
        let event = SseEvent {
            name: self
                .event_name
                .take()
                .unwrap_or_else(|| "message".to_string()),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        self.ready.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn replica_id_extraction() {
        assert_eq!(extract_replica_id("oyerizs4-dspr4").as_deref(), Some("dspr4"));
        assert_eq!(extract_replica_id("singlepart"), None);
        assert_eq!(extract_replica_id(""), None);
        assert_eq!(extract_replica_id("a-b-c").as_deref(), Some("c"));
        assert_eq!(extract_replica_id("trailing-").as_deref(), Some("trailing"));
    }

    #[test]
    fn text_urls_are_pinned_to_the_replica() {
        let mut result = json!({
            "isError": false,
            "content": [
                {
                    "type": "text",
                    "text": "prefix https://mcp-tools-qwen-image-fast.hf.space/gradio_api suffix"
                },
                { "type": "image", "data": "aGk=", "mimeType": "image/png" }
            ]
        });
        let original_image = result["content"][1].clone();

        let rewritten = rewrite_replica_urls(&mut result, "dspr4");
        assert_eq!(rewritten, 1);
        assert_eq!(
            result["content"][0]["text"],
            "prefix https://mcp-tools-qwen-image-fast.hf.space/--replicas/dspr4/gradio_api suffix"
        );
        assert_eq!(result["content"][1], original_image);
    }

    #[test]
    fn rewrite_handles_longer_paths_and_multiple_urls() {
        let mut result = json!({
            "content": [{
                "type": "text",
                "text": "a https://h.hf.space/gradio_api/file=/tmp/x.png b https://h.hf.space/gradio_api/y c https://other.example/api"
            }]
        });
        rewrite_replica_urls(&mut result, "r1");
        assert_eq!(
            result["content"][0]["text"],
            "a https://h.hf.space/--replicas/r1/gradio_api/file=/tmp/x.png b https://h.hf.space/--replicas/r1/gradio_api/y c https://other.example/api"
        );
    }

    #[test]
    fn rewrite_is_idempotent() {
        let mut result = json!({
            "content": [{
                "type": "text",
                "text": "https://h.hf.space/gradio_api/file=/a.png"
            }]
        });
        rewrite_replica_urls(&mut result, "r1");
        let once = result.clone();
        let second_pass = rewrite_replica_urls(&mut result, "r1");
        assert_eq!(second_pass, 0);
        assert_eq!(result, once);
    }

    #[test]
    fn unmodified_text_is_not_replaced() {
        let mut result = json!({
            "content": [{ "type": "text", "text": "no urls here" }]
        });
        assert_eq!(rewrite_replica_urls(&mut result, "r1"), 0);
        assert_eq!(result["content"][0]["text"], "no urls here");
    }

    #[test]
    fn kill_switch_leaves_content_bit_identical() {
        let mut result = json!({
            "isError": false,
            "content": [{
                "type": "text",
                "text": "https://h.hf.space/gradio_api/file=/a.png"
            }]
        });
        let original_content = result["content"].clone();
        let mut captured = BTreeMap::new();
        captured.insert(REPLICA_HEADER.to_string(), "abc-r1".to_string());

        postprocess_result(&mut result, &captured, true);
        assert_eq!(result["content"], original_content);
        // Header echo still happens; only the rewrite is disabled.
        assert_eq!(result["_meta"]["responseHeaders"][REPLICA_HEADER], "abc-r1");
    }

    #[test]
    fn postprocess_rewrites_and_attaches_headers() {
        let mut result = json!({
            "isError": false,
            "content": [{
                "type": "text",
                "text": "https://h.hf.space/gradio_api/file=/a.png"
            }]
        });
        let mut captured = BTreeMap::new();
        captured.insert(REPLICA_HEADER.to_string(), "oyerizs4-dspr4".to_string());

        postprocess_result(&mut result, &captured, false);
        assert_eq!(
            result["content"][0]["text"],
            "https://h.hf.space/--replicas/dspr4/gradio_api/file=/a.png"
        );
        assert_eq!(
            result["_meta"]["responseHeaders"][REPLICA_HEADER],
            "oyerizs4-dspr4"
        );
    }

    #[test]
    fn postprocess_without_captured_headers_adds_no_meta() {
        let mut result = json!({ "isError": false, "content": [] });
        postprocess_result(&mut result, &BTreeMap::new(), false);
        assert!(result.get("_meta").is_none());
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    impl ProgressSink for FailingSink {
        fn send_frame(&self, _frame: Value) -> Result<(), ProgressSendError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ProgressSendError)
        }
    }

    #[test]
    fn relay_latches_disabled_after_first_failure() {
        let sink = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
        });
        let relay = ProgressRelay::new(sink.clone(), json!("tok-1"));

        relay.relay(&json!({ "progress": 1, "total": 10 }));
        relay.relay(&json!({ "progress": 2, "total": 10 }));
        relay.relay(&json!({ "progress": 3, "total": 10 }));

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        assert!(relay.is_disabled());
    }

    struct RecordingSink {
        frames: Mutex<Vec<Value>>,
    }

    impl ProgressSink for RecordingSink {
        fn send_frame(&self, frame: Value) -> Result<(), ProgressSendError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    #[test]
    fn relay_preserves_fields_and_substitutes_the_downstream_token() {
        let sink = Arc::new(RecordingSink {
            frames: Mutex::new(Vec::new()),
        });
        let relay = ProgressRelay::new(sink.clone(), json!(42));

        relay.relay(&json!({
            "progressToken": "upstream-token",
            "progress": 3,
            "total": 10,
            "message": "rendering"
        }));

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["method"], "notifications/progress");
        assert_eq!(frames[0]["params"]["progressToken"], 42);
        assert_eq!(frames[0]["params"]["progress"], 3);
        assert_eq!(frames[0]["params"]["total"], 10);
        assert_eq!(frames[0]["params"]["message"], "rendering");
    }

    #[test]
    fn sse_decoder_handles_chunks_split_anywhere() {
        let mut stream = SseStream {
            inner: futures::stream::empty().boxed(),
            buffer: String::new(),
            event_name: None,
            data_lines: Vec::new(),
            ready: std::collections::VecDeque::new(),
        };

        stream.feed("event: end");
        stream.feed("point\ndata: /gradio_api/mcp/messages/?session_id=abc\n");
        stream.feed("\nevent: message\ndata: {\"id\":0,");
        stream.feed("\"result\":{}}\n\n");

        assert_eq!(
            stream.ready.pop_front(),
            Some(SseEvent {
                name: "endpoint".to_string(),
                data: "/gradio_api/mcp/messages/?session_id=abc".to_string(),
            })
        );
        assert_eq!(
            stream.ready.pop_front(),
            Some(SseEvent {
                name: "message".to_string(),
                data: "{\"id\":0,\"result\":{}}".to_string(),
            })
        );
    }

    #[test]
    fn sse_decoder_joins_multi_line_data() {
        let mut stream = SseStream {
            inner: futures::stream::empty().boxed(),
            buffer: String::new(),
            event_name: None,
            data_lines: Vec::new(),
            ready: std::collections::VecDeque::new(),
        };
        stream.feed("data: line-1\r\ndata: line-2\r\n\r\n");
        assert_eq!(
            stream.ready.pop_front(),
            Some(SseEvent {
                name: "message".to_string(),
                data: "line-1\nline-2".to_string(),
            })
        );
    }
}
