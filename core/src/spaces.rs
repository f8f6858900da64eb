use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable identifier for a remote space: `owner/name`.
///
/// Exactly one `/`, no whitespace, both halves non-empty. The string form is
/// what travels in headers, settings bundles, and hub API paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceRef(String);

impl SpaceRef {
    pub fn parse(raw: &str) -> Result<Self, SpaceRefError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SpaceRefError::new(raw, "space ref must not be empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(SpaceRefError::new(
                raw,
                "space ref must not contain whitespace",
            ));
        }
        let mut parts = trimmed.split('/');
        let owner = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        if owner.is_empty() || name.is_empty() || parts.next().is_some() {
            return Err(SpaceRefError::new(
                raw,
                "space ref must have the form owner/name",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn owner(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or_default()
    }
}

impl fmt::Display for SpaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SpaceRefError {
    pub received: String,
    pub message: &'static str,
}

impl SpaceRefError {
    fn new(received: &str, message: &'static str) -> Self {
        Self {
            received: received.to_string(),
            message,
        }
    }
}

impl fmt::Display for SpaceRefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (received '{}')", self.message, self.received)
    }
}

impl std::error::Error for SpaceRefError {}

/// Description of a remote space as reported by the hub API.
///
/// Private spaces are never inserted into the process-wide cache; the
/// `private` flag gates that at the cache write, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceMetadata {
    pub space_ref: SpaceRef,
    pub subdomain: String,
    pub sdk: String,
    pub private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl SpaceMetadata {
    /// Parse a hub `GET /api/spaces/<ref>` response body.
    ///
    /// `subdomain` is required: without it no upstream URL can be built, so
    /// the whole record is useless to the proxy.
    pub fn from_hub_response(
        space_ref: SpaceRef,
        body: &Value,
        etag: Option<String>,
    ) -> Result<Self, String> {
        let subdomain = body
            .get("subdomain")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("hub response for {space_ref} is missing 'subdomain'"))?
            .to_string();
        let sdk = body
            .get("sdk")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let private = body
            .get("private")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let runtime_stage = body
            .get("runtime")
            .and_then(|r| r.get("stage"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        Ok(Self {
            space_ref,
            subdomain,
            sdk,
            private,
            emoji: string_field(body, "emoji"),
            title: string_field(body, "title"),
            runtime_stage,
            etag,
        })
    }

    pub fn is_gradio(&self) -> bool {
        self.sdk == "gradio"
    }

    /// Base URL of the space itself (not the hub).
    pub fn space_base_url(&self) -> String {
        format!("https://{}.hf.space", self.subdomain)
    }
}

fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// A single callable tool on a space, normalized from either upstream
/// schema shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// The normalized tool list for one space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub space_ref: SpaceRef,
    pub tools: Vec<ToolDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn space_ref_requires_owner_and_name() {
        assert_eq!(SpaceRef::parse("evalstate/flux1").unwrap().owner(), "evalstate");
        assert_eq!(SpaceRef::parse("evalstate/flux1").unwrap().name(), "flux1");

        assert!(SpaceRef::parse("").is_err());
        assert!(SpaceRef::parse("noslash").is_err());
        assert!(SpaceRef::parse("a/b/c").is_err());
        assert!(SpaceRef::parse("a /b").is_err());
        assert!(SpaceRef::parse("/name").is_err());
        assert!(SpaceRef::parse("owner/").is_err());
    }

    #[test]
    fn hub_response_requires_subdomain() {
        let space_ref = SpaceRef::parse("acme/demo").unwrap();
        let err = SpaceMetadata::from_hub_response(space_ref, &json!({"sdk": "gradio"}), None)
            .expect_err("missing subdomain should fail");
        assert!(err.contains("subdomain"));
    }

    #[test]
    fn hub_response_parses_optional_fields() {
        let space_ref = SpaceRef::parse("acme/demo").unwrap();
        let body = json!({
            "subdomain": "acme-demo",
            "sdk": "gradio",
            "private": true,
            "emoji": "🚀",
            "title": "Demo",
            "runtime": { "stage": "RUNNING" }
        });
        let meta =
            SpaceMetadata::from_hub_response(space_ref, &body, Some("\"abc\"".to_string())).unwrap();
        assert_eq!(meta.subdomain, "acme-demo");
        assert!(meta.private);
        assert!(meta.is_gradio());
        assert_eq!(meta.runtime_stage.as_deref(), Some("RUNNING"));
        assert_eq!(meta.etag.as_deref(), Some("\"abc\""));
        assert_eq!(meta.space_base_url(), "https://acme-demo.hf.space");
    }

    #[test]
    fn blank_optional_fields_become_none() {
        let space_ref = SpaceRef::parse("acme/demo").unwrap();
        let body = json!({ "subdomain": "acme-demo", "emoji": "  ", "title": "" });
        let meta = SpaceMetadata::from_hub_response(space_ref, &body, None).unwrap();
        assert_eq!(meta.emoji, None);
        assert_eq!(meta.title, None);
        assert_eq!(meta.sdk, "unknown");
        assert!(!meta.is_gradio());
    }
}
