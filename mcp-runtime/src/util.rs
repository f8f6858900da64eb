use skybridge_core::config::RuntimeSettings;

pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("skybridge-mcp/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Bearer token resolution: explicit caller token first, then the
/// `DEFAULT_HF_TOKEN` environment fallback captured in settings.
pub(crate) fn resolve_token(explicit: Option<&str>, settings: &RuntimeSettings) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| settings.default_token.clone())
}

/// Tokens are never logged in full.
pub(crate) fn token_fingerprint(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}…({} chars)", token.chars().count())
}
