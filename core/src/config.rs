use std::time::Duration;

pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";

const DEFAULT_SPACE_CACHE_TTL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_SCHEMA_CACHE_TTL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_DISCOVERY_CONCURRENCY: usize = 10;
const DEFAULT_SPACE_INFO_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SCHEMA_TIMEOUT_MS: u64 = 12_000;

/// Runtime knobs, resolved once from the environment at startup.
///
/// Every field has a built-in default; unparseable values fall back rather
/// than aborting startup.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub hub_url: String,
    pub space_cache_ttl: Duration,
    pub schema_cache_ttl: Duration,
    pub discovery_concurrency: usize,
    pub space_info_timeout: Duration,
    pub schema_timeout: Duration,
    /// `NO_REPLICA_REWRITE` kill switch: presence disables replica URL rewriting.
    pub replica_rewrite_disabled: bool,
    /// `SEARCH_ENABLES_FETCH`: doc search in the tool set pulls doc fetch in.
    pub search_enables_fetch: bool,
    /// `DEFAULT_HF_TOKEN`: fallback bearer token when the caller supplies none.
    pub default_token: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            space_cache_ttl: Duration::from_millis(DEFAULT_SPACE_CACHE_TTL_MS),
            schema_cache_ttl: Duration::from_millis(DEFAULT_SCHEMA_CACHE_TTL_MS),
            discovery_concurrency: DEFAULT_DISCOVERY_CONCURRENCY,
            space_info_timeout: Duration::from_millis(DEFAULT_SPACE_INFO_TIMEOUT_MS),
            schema_timeout: Duration::from_millis(DEFAULT_SCHEMA_TIMEOUT_MS),
            replica_rewrite_disabled: false,
            search_enables_fetch: false,
            default_token: None,
        }
    }
}

impl RuntimeSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hub_url: env_string("HF_HUB_URL").unwrap_or(defaults.hub_url),
            space_cache_ttl: env_millis("GRADIO_SPACE_CACHE_TTL")
                .unwrap_or(defaults.space_cache_ttl),
            schema_cache_ttl: env_millis("GRADIO_SCHEMA_CACHE_TTL")
                .unwrap_or(defaults.schema_cache_ttl),
            discovery_concurrency: env_count("GRADIO_DISCOVERY_CONCURRENCY")
                .unwrap_or(defaults.discovery_concurrency),
            space_info_timeout: env_millis("GRADIO_SPACE_INFO_TIMEOUT")
                .unwrap_or(defaults.space_info_timeout),
            schema_timeout: env_millis("GRADIO_SCHEMA_TIMEOUT").unwrap_or(defaults.schema_timeout),
            replica_rewrite_disabled: std::env::var_os("NO_REPLICA_REWRITE").is_some(),
            search_enables_fetch: env_bool("SEARCH_ENABLES_FETCH"),
            default_token: env_string("DEFAULT_HF_TOKEN"),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_string(key)?
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

fn env_count(key: &str) -> Option<usize> {
    env_string(key)?.parse::<usize>().ok().filter(|v| *v > 0)
}

fn env_bool(key: &str) -> bool {
    matches!(
        env_string(key).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_documented_values() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.space_cache_ttl, Duration::from_secs(300));
        assert_eq!(settings.schema_cache_ttl, Duration::from_secs(300));
        assert_eq!(settings.discovery_concurrency, 10);
        assert_eq!(settings.space_info_timeout, Duration::from_secs(5));
        assert_eq!(settings.schema_timeout, Duration::from_secs(12));
        assert!(!settings.replica_rewrite_disabled);
        assert!(!settings.search_enables_fetch);
        assert_eq!(settings.default_token, None);
        assert_eq!(settings.hub_url, DEFAULT_HUB_URL);
    }
}
