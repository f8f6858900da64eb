use std::sync::Arc;

use clap::Args;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use skybridge_core::config::RuntimeSettings;
use skybridge_core::spaces::SpaceRef;
use skybridge_mcp_runtime::bridge::{
    InvocationContext, ProgressRelay, ProgressSendError, ProgressSink, UpstreamCall,
    call_space_tool,
};
use skybridge_mcp_runtime::cache::SpaceCache;
use skybridge_mcp_runtime::discovery::discover_spaces;

use crate::util::{client, exit_error, print_json};

#[derive(Args)]
pub struct CallArgs {
    /// Space ref, owner/name
    pub space: String,

    /// Upstream tool name (defaults to the space's only tool)
    #[arg(long)]
    pub tool: Option<String>,

    /// Tool arguments as a JSON object string
    #[arg(long, default_value = "{}")]
    pub args: String,
}

/// Progress notifications land on stderr so stdout stays parseable.
struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn send_frame(&self, frame: Value) -> Result<(), ProgressSendError> {
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        eprintln!("progress: {params}");
        Ok(())
    }
}

pub async fn run(hub_url: &str, token: Option<&str>, args: CallArgs) -> i32 {
    let space_ref = match SpaceRef::parse(&args.space) {
        Ok(space_ref) => space_ref,
        Err(e) => {
            return exit_error(
                &format!("{e}"),
                Some("Space refs look like evalstate/flux1-schnell."),
            );
        }
    };
    let arguments: Value = match serde_json::from_str(&args.args) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(_) => return exit_error("--args must encode a JSON object", None),
        Err(e) => return exit_error(&format!("--args is not valid JSON: {e}"), None),
    };

    let settings = RuntimeSettings {
        hub_url: hub_url.trim_end_matches('/').to_string(),
        ..RuntimeSettings::from_env()
    };
    let cache = SpaceCache::new(settings.space_cache_ttl, settings.schema_cache_ttl);
    let http = client();

    let refs = vec![space_ref.clone()];
    let outcomes = discover_spaces(&http, &settings, &cache, &refs, token).await;
    let Some(outcome) = outcomes.into_iter().next() else {
        return exit_error("discovery returned no outcome", None);
    };
    let (metadata, tools) = match (outcome.metadata, outcome.tools) {
        (Some(metadata), Some(tools)) => (metadata, tools),
        _ => {
            return exit_error(
                &outcome
                    .error
                    .unwrap_or_else(|| format!("{space_ref} exposes no callable tools")),
                None,
            );
        }
    };

    let tool_name = match &args.tool {
        Some(name) => {
            if !tools.iter().any(|t| &t.name == name) {
                let available: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
                return exit_error(
                    &format!("{space_ref} has no tool named '{name}'"),
                    Some(&format!("Available: {}", available.join(", "))),
                );
            }
            name.clone()
        }
        None if tools.len() == 1 => tools[0].name.clone(),
        None => {
            let available: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
            return exit_error(
                &format!("{space_ref} exposes several tools; pass --tool"),
                Some(&format!("Available: {}", available.join(", "))),
            );
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });
    let relay = ProgressRelay::new(Arc::new(StderrProgress), json!("skybridge-cli"));
    let mut ctx = InvocationContext::new(Some(relay), cancel);

    match call_space_tool(
        &http,
        &settings,
        UpstreamCall {
            subdomain: &metadata.subdomain,
            tool_name: &tool_name,
            arguments,
            bearer_token: token,
        },
        &mut ctx,
    )
    .await
    {
        Ok(result) => {
            print_json(&result);
            if result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                1
            } else {
                0
            }
        }
        Err(err) => {
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&err.to_value())
                    .unwrap_or_else(|_| err.to_string())
            );
            2
        }
    }
}
