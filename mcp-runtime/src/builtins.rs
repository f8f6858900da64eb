use std::collections::BTreeMap;

use reqwest::Method;
use serde_json::{Map, Value, json};

use skybridge_core::config::RuntimeSettings;
use skybridge_core::error::codes;

use crate::ToolError;
use crate::{arg_optional_string, arg_optional_string_array, arg_optional_u64, required_string};

pub const TOOL_REPO_SEARCH: &str = "hub_repo_search";
pub const TOOL_REPO_DETAILS: &str = "hub_repo_details";
pub const TOOL_DOC_SEARCH: &str = "hf_doc_search";
pub const TOOL_DOC_FETCH: &str = "hf_doc_fetch";
pub const TOOL_WHOAMI: &str = "hf_whoami";
/// Convenience one-shot invocation of a space tool with flat JSON-string
/// arguments. Dispatched by the server, not `execute_builtin`, because it
/// needs the discovery cache and the SSE bridge.
pub const TOOL_SPACE_INVOKE: &str = "space_invoke";

const SEARCH_LIMIT_DEFAULT: u64 = 10;
const SEARCH_LIMIT_MAX: u64 = 50;
const DOC_FETCH_MAX_CHARS: usize = 60_000;

pub fn all_builtin_ids() -> Vec<String> {
    vec![
        TOOL_REPO_SEARCH.to_string(),
        TOOL_REPO_DETAILS.to_string(),
        TOOL_DOC_SEARCH.to_string(),
        TOOL_DOC_FETCH.to_string(),
        TOOL_WHOAMI.to_string(),
        TOOL_SPACE_INVOKE.to_string(),
    ]
}

#[derive(Debug)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn builtin_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: TOOL_REPO_SEARCH,
            description: "Search Hugging Face Hub repositories (models, datasets, spaces).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "repo_types": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["model", "dataset", "space"] },
                        "description": "Repo types to search. All three when omitted."
                    },
                    "filters": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Hub filter tags (task, library, language, ...)."
                    },
                    "limit": { "type": "integer", "minimum": 1, "maximum": SEARCH_LIMIT_MAX }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: TOOL_REPO_DETAILS,
            description: "Inspect one Hub repository by id.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_id": { "type": "string", "description": "owner/name" },
                    "repo_type": { "type": "string", "enum": ["model", "dataset", "space"], "default": "model" }
                },
                "required": ["repo_id"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: TOOL_DOC_SEARCH,
            description: "Semantic search over Hugging Face documentation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "product": { "type": "string", "description": "Restrict to one doc product (hub, transformers, ...)." }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: TOOL_DOC_FETCH,
            description: "Fetch one Hugging Face documentation page as text.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "doc_url": { "type": "string", "description": "Absolute https://huggingface.co/docs/... URL" }
                },
                "required": ["doc_url"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: TOOL_WHOAMI,
            description: "Show the identity behind the active Hub token.",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: TOOL_SPACE_INVOKE,
            description: "Invoke a space tool in one shot with flat JSON-string parameters. Only works for tools whose parameters are all primitives; use the space's own gr*_ tool otherwise.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "space": { "type": "string", "description": "owner/name" },
                    "tool": { "type": "string", "description": "Upstream tool name. Defaults to the space's only tool." },
                    "parameters": { "type": "string", "description": "Tool arguments as a JSON object string, e.g. {\"prompt\": \"a cat\"}" }
                },
                "required": ["space", "parameters"],
                "additionalProperties": false
            }),
        },
    ]
}

/// Execute one of the plain-HTTP built-ins. `space_invoke` is not handled
/// here; the server routes it through the upstream bridge.
pub(crate) async fn execute_builtin(
    id: &str,
    args: &Map<String, Value>,
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    token: Option<&str>,
) -> Result<Value, ToolError> {
    match id {
        TOOL_REPO_SEARCH => repo_search(args, http, settings, token).await,
        TOOL_REPO_DETAILS => repo_details(args, http, settings, token).await,
        TOOL_DOC_SEARCH => doc_search(args, http, settings, token).await,
        TOOL_DOC_FETCH => doc_fetch(args, http, settings).await,
        TOOL_WHOAMI => whoami(http, settings, token).await,
        _ => Err(ToolError::new(
            codes::UNKNOWN_TOOL,
            format!("Unknown built-in tool '{id}'"),
        )),
    }
}

async fn repo_search(
    args: &Map<String, Value>,
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    token: Option<&str>,
) -> Result<Value, ToolError> {
    let query = arg_optional_string(args, "query")?;
    let repo_types = arg_optional_string_array(args, "repo_types")?
        .unwrap_or_else(|| vec!["model".to_string(), "dataset".to_string(), "space".to_string()]);
    let filters = arg_optional_string_array(args, "filters")?.unwrap_or_default();
    let limit = arg_optional_u64(args, "limit")?
        .unwrap_or(SEARCH_LIMIT_DEFAULT)
        .min(SEARCH_LIMIT_MAX);

    let mut results = Vec::new();
    for repo_type in &repo_types {
        let path = hub_listing_path(repo_type)?;
        let mut pairs: Vec<(String, String)> = vec![("limit".to_string(), limit.to_string())];
        if let Some(query) = &query {
            pairs.push(("search".to_string(), query.clone()));
        }
        for filter in &filters {
            pairs.push(("filter".to_string(), filter.clone()));
        }

        let response = send_hub_request(http, settings, Method::GET, path, &pairs, token).await?;
        if !response.is_success() {
            results.push(json!({
                "repo_type": repo_type,
                "error": { "status": response.status, "body": response.body }
            }));
            continue;
        }
        let items = response
            .body
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| compact_repo_entry(repo_type, item))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        results.push(json!({ "repo_type": repo_type, "items": items }));
    }

    Ok(json!({
        "request": { "query": query, "repo_types": repo_types, "filters": filters, "limit": limit },
        "results": results
    }))
}

fn hub_listing_path(repo_type: &str) -> Result<&'static str, ToolError> {
    match repo_type {
        "model" => Ok("/api/models"),
        "dataset" => Ok("/api/datasets"),
        "space" => Ok("/api/spaces"),
        _ => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("repo_types entries must be model, dataset or space (got '{repo_type}')"),
        )
        .with_field("repo_types")),
    }
}

fn compact_repo_entry(repo_type: &str, item: &Value) -> Value {
    let mut entry = json!({
        "repo_type": repo_type,
        "id": item.get("id").cloned().unwrap_or(Value::Null)
    });
    for key in ["likes", "downloads", "lastModified", "pipeline_tag", "private"] {
        if let Some(value) = item.get(key) {
            if !value.is_null() {
                entry[key] = value.clone();
            }
        }
    }
    entry
}

async fn repo_details(
    args: &Map<String, Value>,
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    token: Option<&str>,
) -> Result<Value, ToolError> {
    let repo_id = required_string(args, "repo_id")?;
    let repo_type = arg_optional_string(args, "repo_type")?.unwrap_or_else(|| "model".to_string());
    let base = hub_listing_path(&repo_type)?;
    let path = format!("{base}/{repo_id}");

    let response = send_hub_request(http, settings, Method::GET, &path, &[], token).await?;
    Ok(json!({
        "request": { "path": path, "repo_type": repo_type },
        "response": response.to_value()
    }))
}

async fn doc_search(
    args: &Map<String, Value>,
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    token: Option<&str>,
) -> Result<Value, ToolError> {
    let query = required_string(args, "query")?;
    let mut pairs = vec![("q".to_string(), query.clone())];
    if let Some(product) = arg_optional_string(args, "product")? {
        pairs.push(("product".to_string(), product));
    }

    let response =
        send_hub_request(http, settings, Method::GET, "/api/docs/search", &pairs, token).await?;
    Ok(json!({
        "request": { "path": "/api/docs/search", "query": query },
        "response": response.to_value()
    }))
}

async fn doc_fetch(
    args: &Map<String, Value>,
    http: &reqwest::Client,
    settings: &RuntimeSettings,
) -> Result<Value, ToolError> {
    let doc_url = required_string(args, "doc_url")?;
    let docs_prefix = format!("{}/docs", settings.hub_url.trim_end_matches('/'));
    if !doc_url.starts_with(&docs_prefix) {
        return Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("doc_url must start with {docs_prefix}"),
        )
        .with_field("doc_url"));
    }

    let response = http.get(&doc_url).send().await.map_err(|e| {
        ToolError::new(
            codes::CONNECTION_ERROR,
            format!("Failed to fetch documentation page: {e}"),
        )
    })?;
    let status = response.status().as_u16();
    let text = response.text().await.map_err(|e| {
        ToolError::new(
            codes::RESPONSE_ERROR,
            format!("Failed to read documentation page body: {e}"),
        )
    })?;

    let truncated = text.len() > DOC_FETCH_MAX_CHARS;
    let body: String = if truncated {
        text.chars().take(DOC_FETCH_MAX_CHARS).collect()
    } else {
        text
    };

    Ok(json!({
        "request": { "doc_url": doc_url },
        "status": status,
        "truncated": truncated,
        "text": body
    }))
}

async fn whoami(
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    token: Option<&str>,
) -> Result<Value, ToolError> {
    if token.is_none() {
        return Err(ToolError::new(
            codes::AUTH_MISSING,
            "No Hub token available for whoami",
        )
        .with_docs_hint("Pass a bearer token or set DEFAULT_HF_TOKEN."));
    }

    let response =
        send_hub_request(http, settings, Method::GET, "/api/whoami-v2", &[], token).await?;
    Ok(json!({
        "request": { "path": "/api/whoami-v2" },
        "response": response.to_value()
    }))
}

/// Outcome of one hub API call: HTTP status plus parsed body. Non-2xx is
/// data here, not an error; callers decide how to surface it.
#[derive(Debug)]
pub(crate) struct ApiCallResult {
    pub status: u16,
    pub body: Value,
    pub headers: Option<BTreeMap<String, String>>,
}

impl ApiCallResult {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "ok": self.is_success(),
            "status": self.status,
            "body": self.body
        });
        if let Some(headers) = &self.headers {
            value["headers"] = json!(headers);
        }
        value
    }
}

/// One hub API request. Hub calls authenticate with the standard
/// `Authorization` header; the `X-HF-Authorization` slot is reserved for
/// upstream space calls.
pub(crate) async fn send_hub_request(
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    method: Method,
    path: &str,
    query: &[(String, String)],
    token: Option<&str>,
) -> Result<ApiCallResult, ToolError> {
    let url = format!("{}{}", settings.hub_url.trim_end_matches('/'), path);
    let mut request = http.request(method, &url);
    if !query.is_empty() {
        request = request.query(query);
    }
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {token}"));
    }

    let response = request.send().await.map_err(|e| {
        ToolError::new(
            codes::CONNECTION_ERROR,
            format!("Failed to reach the hub at {url}: {e}"),
        )
    })?;

    let status = response.status().as_u16();
    let bytes = response.bytes().await.map_err(|e| {
        ToolError::new(
            codes::RESPONSE_ERROR,
            format!("Failed to read hub response body: {e}"),
        )
    })?;
    let body = parse_response_body(&bytes);

    Ok(ApiCallResult {
        status,
        body,
        headers: None,
    })
}

pub(crate) fn parse_response_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_cover_every_builtin_id() {
        let ids = all_builtin_ids();
        let defined: Vec<&str> = builtin_definitions().iter().map(|d| d.name).collect();
        assert_eq!(ids.len(), defined.len());
        for id in &ids {
            assert!(defined.contains(&id.as_str()), "missing definition for {id}");
        }
    }

    #[test]
    fn definitions_are_object_schemas() {
        for def in builtin_definitions() {
            assert_eq!(
                def.input_schema.get("type").and_then(Value::as_str),
                Some("object"),
                "{} schema must be object-typed",
                def.name
            );
        }
    }

    #[test]
    fn listing_path_rejects_unknown_repo_type() {
        assert!(hub_listing_path("model").is_ok());
        let err = hub_listing_path("widget").expect_err("unknown repo type");
        assert_eq!(err.code, codes::VALIDATION_FAILED);
    }

    #[test]
    fn compact_repo_entry_keeps_only_summary_fields() {
        let item = serde_json::json!({
            "id": "qwen/qwen-7b",
            "likes": 12,
            "downloads": 345,
            "siblings": [{"rfilename": "big"}],
            "config": {"architectures": ["x"]}
        });
        let entry = compact_repo_entry("model", &item);
        assert_eq!(entry["id"], "qwen/qwen-7b");
        assert_eq!(entry["likes"], 12);
        assert!(entry.get("siblings").is_none());
        assert!(entry.get("config").is_none());
    }

    #[test]
    fn response_body_falls_back_to_text() {
        assert_eq!(parse_response_body(b""), Value::Null);
        assert_eq!(
            parse_response_body(b"{\"ok\":true}"),
            serde_json::json!({"ok": true})
        );
        assert_eq!(
            parse_response_body(b"<html>nope</html>"),
            Value::String("<html>nope</html>".to_string())
        );
    }
}
