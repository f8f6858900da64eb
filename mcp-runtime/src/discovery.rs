use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, OnceLock};

use futures::StreamExt;
use futures::stream;
use tokio::time::timeout;
use tracing::{trace, warn};

use skybridge_core::config::RuntimeSettings;
use skybridge_core::spaces::{SchemaEntry, SpaceMetadata, SpaceRef, ToolDescriptor};

use crate::cache::SpaceCache;
use crate::schema::normalize_schema_document;

/// One discovery result, in input order. `error` is set when the space was
/// dropped from the catalogue; the rest of the list is unaffected.
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub space_ref: SpaceRef,
    pub metadata: Option<SpaceMetadata>,
    pub tools: Option<Vec<ToolDescriptor>>,
    pub error: Option<String>,
}

/// Outcome of one hub metadata fetch.
pub(crate) enum MetadataFetch {
    Fresh(SpaceMetadata),
    NotModified,
    Failed(String),
}

/// Discover metadata and tool schemas for a list of spaces.
///
/// Two phases, each internally parallel with a bounded concurrency cap,
/// results emitted in input order. A failing space only removes itself.
pub async fn discover_spaces(
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    cache: &SpaceCache,
    refs: &[SpaceRef],
    token: Option<&str>,
) -> Vec<DiscoveryOutcome> {
    let fetch_metadata = |space_ref: SpaceRef, etag: Option<String>| {
        let http = http.clone();
        let settings = settings.clone();
        let token = token.map(ToOwned::to_owned);
        async move { fetch_metadata_from_hub(&http, &settings, &space_ref, etag, token.as_deref()).await }
    };
    let fetch_schema = |metadata: SpaceMetadata| {
        let http = http.clone();
        let settings = settings.clone();
        let token = token.map(ToOwned::to_owned);
        async move { fetch_schema_from_space(&http, &settings, &metadata, token.as_deref()).await }
    };
    run_discovery(
        cache,
        settings.discovery_concurrency,
        refs,
        fetch_metadata,
        fetch_schema,
    )
    .await
}

/// Phase-A-only refresh for a single ref, used by invocation dispatch when
/// the cached metadata went stale under an active catalogue entry.
pub async fn refresh_metadata(
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    cache: &SpaceCache,
    space_ref: &SpaceRef,
    token: Option<&str>,
) -> Option<SpaceMetadata> {
    if let Some(metadata) = cache.get_metadata(space_ref) {
        return Some(metadata);
    }
    let stale = cache.get_metadata_stale(space_ref);
    let etag = stale.as_ref().and_then(|m| m.etag.clone());
    match fetch_metadata_from_hub(http, settings, space_ref, etag, token).await {
        MetadataFetch::Fresh(metadata) => {
            cache.put_metadata(metadata.clone());
            Some(metadata)
        }
        MetadataFetch::NotModified => {
            cache.touch_metadata(space_ref);
            stale
        }
        MetadataFetch::Failed(error) => {
            log_discovery_failure(space_ref, "metadata", &error);
            None
        }
    }
}

async fn run_discovery<FM, MFut, FS, SFut>(
    cache: &SpaceCache,
    concurrency: usize,
    refs: &[SpaceRef],
    fetch_metadata: FM,
    fetch_schema: FS,
) -> Vec<DiscoveryOutcome>
where
    FM: Fn(SpaceRef, Option<String>) -> MFut,
    MFut: Future<Output = MetadataFetch>,
    FS: Fn(SpaceMetadata) -> SFut,
    SFut: Future<Output = Result<Vec<ToolDescriptor>, String>>,
{
    let concurrency = concurrency.max(1);

    // Phase A: metadata, cache-first with conditional revalidation.
    let fetch_metadata = &fetch_metadata;
    let phase_a: Vec<(SpaceRef, Result<SpaceMetadata, String>)> =
        stream::iter(refs.iter().cloned().map(|space_ref| async move {
            if let Some(metadata) = cache.get_metadata(&space_ref) {
                return (space_ref, Ok(metadata));
            }
            let stale = cache.get_metadata_stale(&space_ref);
            let etag = stale.as_ref().and_then(|m| m.etag.clone());
            match fetch_metadata(space_ref.clone(), etag).await {
                MetadataFetch::Fresh(metadata) => {
                    cache.put_metadata(metadata.clone());
                    (space_ref, Ok(metadata))
                }
                MetadataFetch::NotModified => match stale {
                    Some(metadata) => {
                        cache.touch_metadata(&space_ref);
                        (space_ref, Ok(metadata))
                    }
                    None => (
                        space_ref,
                        Err("hub returned 304 but no cached entry exists".to_string()),
                    ),
                },
                MetadataFetch::Failed(error) => (space_ref, Err(error)),
            }
        }))
        .buffered(concurrency)
        .collect()
        .await;

    // Phase B: tool schemas for gradio spaces. Private spaces always fetch
    // fresh and never cache.
    let fetch_schema = &fetch_schema;
    stream::iter(
        phase_a
            .into_iter()
            .map(|(space_ref, metadata_result)| async move {
                let metadata = match metadata_result {
                    Ok(metadata) => metadata,
                    Err(error) => {
                        log_discovery_failure(&space_ref, "metadata", &error);
                        return DiscoveryOutcome {
                            space_ref,
                            metadata: None,
                            tools: None,
                            error: Some(error),
                        };
                    }
                };
                if !metadata.is_gradio() {
                    return DiscoveryOutcome {
                        space_ref,
                        metadata: Some(metadata),
                        tools: None,
                        error: None,
                    };
                }
                if !metadata.private {
                    if let Some(entry) = cache.get_schema(&space_ref) {
                        return DiscoveryOutcome {
                            space_ref,
                            metadata: Some(metadata),
                            tools: Some(entry.tools),
                            error: None,
                        };
                    }
                }
                match fetch_schema(metadata.clone()).await {
                    Ok(tools) => {
                        cache.put_schema_checked(
                            SchemaEntry {
                                space_ref: space_ref.clone(),
                                tools: tools.clone(),
                            },
                            metadata.private,
                        );
                        DiscoveryOutcome {
                            space_ref,
                            metadata: Some(metadata),
                            tools: Some(tools),
                            error: None,
                        }
                    }
                    Err(error) => {
                        log_discovery_failure(&space_ref, "schema", &error);
                        DiscoveryOutcome {
                            space_ref,
                            metadata: Some(metadata),
                            tools: None,
                            error: Some(error),
                        }
                    }
                }
            }),
    )
    .buffered(concurrency)
    .collect()
    .await
}

pub(crate) async fn fetch_metadata_from_hub(
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    space_ref: &SpaceRef,
    etag: Option<String>,
    token: Option<&str>,
) -> MetadataFetch {
    let url = format!(
        "{}/api/spaces/{}",
        settings.hub_url.trim_end_matches('/'),
        space_ref
    );
    let mut request = http.get(&url);
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {token}"));
    }
    if let Some(etag) = &etag {
        request = request.header("If-None-Match", etag);
    }

    let response = match timeout(settings.space_info_timeout, request.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return MetadataFetch::Failed(format!("hub request failed: {e}")),
        Err(_) => {
            return MetadataFetch::Failed(format!(
                "hub request timed out after {} ms",
                settings.space_info_timeout.as_millis()
            ));
        }
    };

    let status = response.status();
    if status.as_u16() == 304 {
        return MetadataFetch::NotModified;
    }
    if !status.is_success() {
        return MetadataFetch::Failed(format!("hub returned HTTP {}", status.as_u16()));
    }

    let response_etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);
    let body: serde_json::Value = match timeout(settings.space_info_timeout, response.json()).await
    {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => return MetadataFetch::Failed(format!("invalid hub response body: {e}")),
        Err(_) => return MetadataFetch::Failed("hub response body timed out".to_string()),
    };

    match SpaceMetadata::from_hub_response(space_ref.clone(), &body, response_etag) {
        Ok(metadata) => MetadataFetch::Fresh(metadata),
        Err(error) => MetadataFetch::Failed(error),
    }
}

pub(crate) async fn fetch_schema_from_space(
    http: &reqwest::Client,
    settings: &RuntimeSettings,
    metadata: &SpaceMetadata,
    token: Option<&str>,
) -> Result<Vec<ToolDescriptor>, String> {
    let url = format!("{}/gradio_api/mcp/schema", metadata.space_base_url());
    let mut request = http.get(&url);
    if let Some(token) = token {
        request = request.header("X-HF-Authorization", format!("Bearer {token}"));
    }

    let response = match timeout(settings.schema_timeout, request.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(format!("schema request failed: {e}")),
        Err(_) => {
            return Err(format!(
                "schema request timed out after {} ms",
                settings.schema_timeout.as_millis()
            ));
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Err(format!("schema endpoint returned HTTP {}", status.as_u16()));
    }
    let body: serde_json::Value = match timeout(settings.schema_timeout, response.json()).await {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => return Err(format!("invalid schema response body: {e}")),
        Err(_) => return Err("schema response body timed out".to_string()),
    };

    normalize_schema_document(&body)
}

/// First failure for a ref logs at `warn`, later ones at `trace`.
///
/// The memo is process-wide and never resets: a space that fails, heals, and
/// fails again will not produce a second warn.
fn log_discovery_failure(space_ref: &SpaceRef, stage: &str, error: &str) {
    static FIRST_ERROR_SEEN: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    let seen = FIRST_ERROR_SEEN.get_or_init(|| Mutex::new(HashSet::new()));
    let first = seen
        .lock()
        .map(|mut set| set.insert(space_ref.as_str().to_string()))
        .unwrap_or(false);
    if first {
        warn!(space = %space_ref, stage, error, "space discovery failed");
    } else {
        trace!(space = %space_ref, stage, error, "space discovery failed");
    }
}
