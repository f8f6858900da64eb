use clap::Subcommand;
use serde_json::{Value, json};

use skybridge_core::config::RuntimeSettings;
use skybridge_core::spaces::SpaceRef;
use skybridge_mcp_runtime::cache::SpaceCache;
use skybridge_mcp_runtime::discovery::{DiscoveryOutcome, discover_spaces};

use crate::util::{client, exit_error, print_json};

#[derive(Subcommand)]
pub enum SpacesCommands {
    /// Show hub metadata for one or more spaces
    Metadata {
        /// Space refs, owner/name
        #[arg(required = true)]
        refs: Vec<String>,
    },
    /// List the tools one or more spaces expose
    Tools {
        /// Space refs, owner/name
        #[arg(required = true)]
        refs: Vec<String>,
    },
}

pub async fn run(hub_url: &str, token: Option<&str>, command: SpacesCommands) -> i32 {
    let (raw_refs, include_tools) = match &command {
        SpacesCommands::Metadata { refs } => (refs, false),
        SpacesCommands::Tools { refs } => (refs, true),
    };

    let mut refs = Vec::with_capacity(raw_refs.len());
    for raw in raw_refs {
        match SpaceRef::parse(raw) {
            Ok(space_ref) => refs.push(space_ref),
            Err(e) => {
                return exit_error(
                    &format!("{e}"),
                    Some("Space refs look like evalstate/flux1-schnell."),
                );
            }
        }
    }

    let settings = RuntimeSettings {
        hub_url: hub_url.trim_end_matches('/').to_string(),
        ..RuntimeSettings::from_env()
    };
    let cache = SpaceCache::new(settings.space_cache_ttl, settings.schema_cache_ttl);
    let http = client();

    let outcomes = discover_spaces(&http, &settings, &cache, &refs, token).await;
    let failed = outcomes.iter().any(|o| o.error.is_some());

    let payload = json!({
        "spaces": outcomes
            .iter()
            .map(|outcome| outcome_to_json(outcome, include_tools))
            .collect::<Vec<_>>()
    });
    print_json(&payload);

    if failed { 2 } else { 0 }
}

fn outcome_to_json(outcome: &DiscoveryOutcome, include_tools: bool) -> Value {
    let mut entry = json!({ "ref": outcome.space_ref.to_string() });
    if let Some(metadata) = &outcome.metadata {
        entry["metadata"] = json!({
            "subdomain": metadata.subdomain,
            "sdk": metadata.sdk,
            "private": metadata.private,
            "emoji": metadata.emoji,
            "title": metadata.title,
            "runtime_stage": metadata.runtime_stage,
        });
    }
    if include_tools {
        if let Some(tools) = &outcome.tools {
            entry["tools"] = json!(
                tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "inputSchema": tool.input_schema,
                        })
                    })
                    .collect::<Vec<_>>()
            );
        }
    }
    if let Some(error) = &outcome.error {
        entry["error"] = json!(error);
    }
    entry
}
