use skybridge_core::spaces::SpaceRef;

use crate::builtins::{
    TOOL_DOC_FETCH, TOOL_DOC_SEARCH, TOOL_REPO_DETAILS, TOOL_REPO_SEARCH, TOOL_WHOAMI,
    all_builtin_ids,
};

/// Session-level header overrides (`X-MCP-Bouquet`, `X-MCP-Mix`,
/// `X-MCP-Gradio`), parsed by the transport and handed in here.
#[derive(Debug, Clone, Default)]
pub struct HeaderOverrides {
    pub bouquet: Option<String>,
    pub mix: Vec<String>,
    pub gradio: Vec<SpaceRef>,
}

/// Stored user settings: which built-ins are on and which spaces to attach.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub spaces: Vec<SpaceRef>,
}

/// Where the settings came from. Recorded for observability; does not change
/// behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsSource {
    CallerSupplied,
    ServiceCatalogue,
    None,
}

impl SettingsSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingsSource::CallerSupplied => "caller_supplied",
            SettingsSource::ServiceCatalogue => "service_catalogue",
            SettingsSource::None => "none",
        }
    }
}

/// The resolved active set for a session.
#[derive(Debug, Clone)]
pub struct ToolSelection {
    pub builtin_ids: Vec<String>,
    pub spaces: Vec<SpaceRef>,
    pub source: SettingsSource,
}

/// Named presets of built-in tool IDs.
const BOUQUETS: &[(&str, &[&str])] = &[
    ("search", &[TOOL_REPO_SEARCH, TOOL_DOC_SEARCH, TOOL_DOC_FETCH]),
    ("docs", &[TOOL_DOC_SEARCH, TOOL_DOC_FETCH]),
    ("hub_api", &[TOOL_REPO_SEARCH, TOOL_REPO_DETAILS, TOOL_WHOAMI]),
];

fn bouquet_tools(name: &str) -> Option<Vec<String>> {
    let trimmed = name.trim();
    if trimmed.eq_ignore_ascii_case("all") {
        return Some(all_builtin_ids());
    }
    BOUQUETS
        .iter()
        .find(|(preset, _)| trimmed.eq_ignore_ascii_case(preset))
        .map(|(_, tools)| tools.iter().map(|t| t.to_string()).collect())
}

/// Resolve the active tool-ID set for a session.
///
/// Precedence, highest first: bouquet override (ignores settings entirely),
/// mix union (when base settings exist), user settings, all built-ins.
/// Post-resolution: legacy ID normalization, search-enables-fetch coupling,
/// and the gradio header's extra endpoints.
pub fn resolve_tool_selection(
    overrides: &HeaderOverrides,
    settings: Option<&UserSettings>,
    source: SettingsSource,
    search_enables_fetch: bool,
) -> ToolSelection {
    let bouquet = overrides
        .bouquet
        .as_deref()
        .and_then(bouquet_tools);

    let (mut tools, mut spaces, source) = match (bouquet, settings) {
        (Some(preset), _) => (preset, Vec::new(), SettingsSource::None),
        (None, Some(base)) => {
            let mut tools = base.tools.clone();
            for mix in &overrides.mix {
                if let Some(preset) = bouquet_tools(mix) {
                    tools.extend(preset);
                }
            }
            (tools, base.spaces.clone(), source)
        }
        (None, None) => (all_builtin_ids(), Vec::new(), SettingsSource::None),
    };

    tools = normalize_tool_ids(&tools);

    if search_enables_fetch
        && tools.iter().any(|t| t == TOOL_DOC_SEARCH)
        && !tools.iter().any(|t| t == TOOL_DOC_FETCH)
    {
        tools.push(TOOL_DOC_FETCH.to_string());
    }

    for space in &overrides.gradio {
        if !spaces.contains(space) {
            spaces.push(space.clone());
        }
    }

    ToolSelection {
        builtin_ids: tools,
        spaces,
        source,
    }
}

/// Rewrite legacy tool IDs to canonical ones.
///
/// Search aliases map in place (first occurrence kept); detail aliases are
/// removed and the single inspection tool is appended once at the end.
/// Unknown IDs pass through in order.
pub fn normalize_tool_ids(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    let mut saw_detail_alias = false;

    for id in ids {
        let canonical = match classify_legacy_id(id) {
            LegacyId::SearchAlias => TOOL_REPO_SEARCH.to_string(),
            LegacyId::DetailAlias => {
                saw_detail_alias = true;
                continue;
            }
            LegacyId::NotLegacy => id.clone(),
        };
        if !out.contains(&canonical) {
            out.push(canonical);
        }
    }

    if saw_detail_alias && !out.iter().any(|t| t == TOOL_REPO_DETAILS) {
        out.push(TOOL_REPO_DETAILS.to_string());
    }
    out
}

enum LegacyId {
    SearchAlias,
    DetailAlias,
    NotLegacy,
}

fn classify_legacy_id(id: &str) -> LegacyId {
    let mut base = id.trim().to_lowercase().replace('-', "_");
    if let Some(stripped) = base.strip_prefix("hf_") {
        // hf_doc_search / hf_doc_fetch / hf_whoami are canonical, not aliases
        if !matches!(stripped, "doc_search" | "doc_fetch" | "whoami") {
            base = stripped.to_string();
        }
    }
    match base.as_str() {
        "model_search" | "dataset_search" | "repo_search" | "space_search" => LegacyId::SearchAlias,
        "model_details" | "dataset_details" | "space_details" | "model_detail"
        | "dataset_detail" | "space_detail" => LegacyId::DetailAlias,
        _ => LegacyId::NotLegacy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn search_aliases_collapse_to_one_canonical_entry() {
        let normalized = normalize_tool_ids(&ids(&["model_search", "repo_search", "dataset_search"]));
        assert_eq!(normalized, vec![TOOL_REPO_SEARCH.to_string()]);
    }

    #[test]
    fn detail_aliases_collapse_and_append_after_passthrough_ids() {
        let normalized = normalize_tool_ids(&ids(&["model_detail", "custom_flag", "dataset_detail"]));
        assert_eq!(
            normalized,
            vec!["custom_flag".to_string(), TOOL_REPO_DETAILS.to_string()]
        );
    }

    #[test]
    fn canonical_ids_are_not_rewritten() {
        let normalized = normalize_tool_ids(&ids(&[TOOL_DOC_SEARCH, TOOL_REPO_DETAILS]));
        assert_eq!(
            normalized,
            vec![TOOL_DOC_SEARCH.to_string(), TOOL_REPO_DETAILS.to_string()]
        );
    }

    #[test]
    fn bouquet_overrides_settings_entirely() {
        let overrides = HeaderOverrides {
            bouquet: Some("docs".to_string()),
            ..Default::default()
        };
        let settings = UserSettings {
            tools: ids(&[TOOL_REPO_SEARCH]),
            spaces: vec![SpaceRef::parse("acme/demo").unwrap()],
        };
        let selection = resolve_tool_selection(
            &overrides,
            Some(&settings),
            SettingsSource::CallerSupplied,
            false,
        );
        assert_eq!(selection.builtin_ids, ids(&[TOOL_DOC_SEARCH, TOOL_DOC_FETCH]));
        assert!(selection.spaces.is_empty());
        assert_eq!(selection.source, SettingsSource::None);
    }

    #[test]
    fn unknown_bouquet_falls_through_to_settings() {
        let overrides = HeaderOverrides {
            bouquet: Some("no-such-preset".to_string()),
            ..Default::default()
        };
        let settings = UserSettings {
            tools: ids(&[TOOL_REPO_SEARCH]),
            spaces: vec![],
        };
        let selection = resolve_tool_selection(
            &overrides,
            Some(&settings),
            SettingsSource::ServiceCatalogue,
            false,
        );
        assert_eq!(selection.builtin_ids, ids(&[TOOL_REPO_SEARCH]));
        assert_eq!(selection.source, SettingsSource::ServiceCatalogue);
    }

    #[test]
    fn mix_unions_preset_onto_base_settings() {
        let overrides = HeaderOverrides {
            mix: vec!["docs".to_string()],
            ..Default::default()
        };
        let settings = UserSettings {
            tools: ids(&[TOOL_REPO_SEARCH]),
            spaces: vec![],
        };
        let selection = resolve_tool_selection(
            &overrides,
            Some(&settings),
            SettingsSource::CallerSupplied,
            false,
        );
        assert_eq!(
            selection.builtin_ids,
            ids(&[TOOL_REPO_SEARCH, TOOL_DOC_SEARCH, TOOL_DOC_FETCH])
        );
    }

    #[test]
    fn mix_without_base_settings_is_ignored() {
        let overrides = HeaderOverrides {
            mix: vec!["docs".to_string()],
            ..Default::default()
        };
        let selection =
            resolve_tool_selection(&overrides, None, SettingsSource::None, false);
        assert_eq!(selection.builtin_ids, all_builtin_ids());
    }

    #[test]
    fn no_settings_enables_all_builtins() {
        let selection = resolve_tool_selection(
            &HeaderOverrides::default(),
            None,
            SettingsSource::None,
            false,
        );
        assert_eq!(selection.builtin_ids, all_builtin_ids());
    }

    #[test]
    fn search_enables_fetch_adds_doc_fetch() {
        let settings = UserSettings {
            tools: ids(&[TOOL_DOC_SEARCH]),
            spaces: vec![],
        };
        let selection = resolve_tool_selection(
            &HeaderOverrides::default(),
            Some(&settings),
            SettingsSource::CallerSupplied,
            true,
        );
        assert_eq!(selection.builtin_ids, ids(&[TOOL_DOC_SEARCH, TOOL_DOC_FETCH]));

        let off = resolve_tool_selection(
            &HeaderOverrides::default(),
            Some(&settings),
            SettingsSource::CallerSupplied,
            false,
        );
        assert_eq!(off.builtin_ids, ids(&[TOOL_DOC_SEARCH]));
    }

    #[test]
    fn gradio_header_appends_deduplicated_endpoints() {
        let demo = SpaceRef::parse("acme/demo").unwrap();
        let extra = SpaceRef::parse("acme/extra").unwrap();
        let overrides = HeaderOverrides {
            gradio: vec![demo.clone(), extra.clone()],
            ..Default::default()
        };
        let settings = UserSettings {
            tools: vec![],
            spaces: vec![demo.clone()],
        };
        let selection = resolve_tool_selection(
            &overrides,
            Some(&settings),
            SettingsSource::CallerSupplied,
            false,
        );
        assert_eq!(selection.spaces, vec![demo, extra]);
    }
}
