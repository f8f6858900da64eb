/// Error codes used across the proxy. These appear verbatim in structured
/// tool-error payloads, so agents can branch on them deterministically.
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const CONNECTION_ERROR: &str = "connection_error";
    pub const RESPONSE_ERROR: &str = "response_error";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const UPSTREAM_TIMEOUT: &str = "upstream_timeout";
    pub const CANCELLED: &str = "cancelled";
    pub const AUTH_MISSING: &str = "auth_missing";
    pub const INVALID_JSON: &str = "invalid_json";
    pub const COMPLEX_SCHEMA: &str = "complex_schema";
    pub const NO_USABLE_TOOLS: &str = "no_usable_tools";
    pub const SPACE_UNAVAILABLE: &str = "space_unavailable";
}
