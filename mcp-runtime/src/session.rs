use std::collections::BTreeSet;
use std::sync::Mutex;

use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use skybridge_core::spaces::SpaceRef;

use crate::builtins::builtin_definitions;
use crate::discovery::DiscoveryOutcome;
use crate::selection::ToolSelection;

/// What backs a catalogue entry: a built-in handler or an upstream space tool.
#[derive(Debug, Clone)]
pub enum ToolBackend {
    BuiltIn {
        id: String,
    },
    Dynamic {
        space_ref: SpaceRef,
        subdomain: String,
        tool_name: String,
        private: bool,
    },
}

/// One entry in the active per-session catalogue.
#[derive(Debug, Clone)]
pub struct CallableTool {
    pub outward_name: String,
    pub description: String,
    pub schema: Value,
    pub backend: ToolBackend,
    pub enabled: bool,
}

/// Outward name for a dynamic tool: `gr{index}_{name}`, with a `p` marker
/// when the backing space is private. Deterministic given the session's
/// endpoint index and the upstream name.
pub fn outward_name(endpoint_index: usize, private: bool, tool_name: &str) -> String {
    if private {
        format!("gr{endpoint_index}p_{tool_name}")
    } else {
        format!("gr{endpoint_index}_{tool_name}")
    }
}

/// Everything scoped to one connected client.
///
/// Mutations go through the methods here and are serialised by the inner
/// lock; the catalogue-change listener is single-subscriber and dies with
/// the session.
pub struct Session {
    state: Mutex<SessionState>,
}

struct SessionState {
    session_id: String,
    client_info: Option<Value>,
    catalogue: Vec<CallableTool>,
    last_emitted: BTreeSet<String>,
    listener: Option<UnboundedSender<Value>>,
    built: bool,
}

impl Session {
    pub fn new(session_id: String) -> Self {
        Self {
            state: Mutex::new(SessionState {
                session_id,
                client_info: None,
                catalogue: Vec::new(),
                last_emitted: BTreeSet::new(),
                listener: None,
                built: false,
            }),
        }
    }

    pub fn session_id(&self) -> String {
        self.lock().session_id.clone()
    }

    pub fn set_listener(&self, listener: UnboundedSender<Value>) {
        self.lock().listener = Some(listener);
    }

    pub fn set_client_info(&self, client_info: Option<Value>) {
        self.lock().client_info = client_info;
    }

    pub fn client_info(&self) -> Option<Value> {
        self.lock().client_info.clone()
    }

    pub fn is_built(&self) -> bool {
        self.lock().built
    }

    /// Replace the whole catalogue. The first install sets the baseline for
    /// change notifications; later installs emit `tools/list_changed` iff the
    /// enabled outward-name set actually changed.
    pub fn install_catalogue(&self, tools: Vec<CallableTool>) {
        let mut state = self.lock();
        let first = !state.built;
        state.catalogue = tools;
        state.built = true;
        if first {
            state.last_emitted = enabled_names(&state.catalogue);
        } else {
            emit_if_changed(&mut state);
        }
    }

    /// Enable or disable one tool. `Some(changed)` on success; `None` when no
    /// entry carries that outward name, so the caller can surface
    /// "tool not found".
    pub fn set_enabled(&self, outward: &str, enabled: bool) -> Option<bool> {
        let mut state = self.lock();
        let tool = state
            .catalogue
            .iter_mut()
            .find(|tool| tool.outward_name == outward)?;
        if tool.enabled == enabled {
            return Some(false);
        }
        tool.enabled = enabled;
        emit_if_changed(&mut state);
        Some(true)
    }

    /// Catalogue lookup by outward name, enabled or not. The caller decides
    /// how to treat disabled entries (listing hides them, invocation refuses).
    pub fn lookup(&self, outward: &str) -> Option<CallableTool> {
        self.lock()
            .catalogue
            .iter()
            .find(|tool| tool.outward_name == outward)
            .cloned()
    }

    /// `tools/list` payload: enabled entries only, in catalogue order.
    pub fn tools_list_payload(&self) -> Value {
        let state = self.lock();
        let tools: Vec<Value> = state
            .catalogue
            .iter()
            .filter(|tool| tool.enabled)
            .map(|tool| {
                json!({
                    "name": tool.outward_name,
                    "description": tool.description,
                    "inputSchema": tool.schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    pub fn enabled_count(&self) -> usize {
        self.lock()
            .catalogue
            .iter()
            .filter(|tool| tool.enabled)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn enabled_names(catalogue: &[CallableTool]) -> BTreeSet<String> {
    catalogue
        .iter()
        .filter(|tool| tool.enabled)
        .map(|tool| tool.outward_name.clone())
        .collect()
}

fn emit_if_changed(state: &mut SessionState) {
    let current = enabled_names(&state.catalogue);
    if current == state.last_emitted {
        return;
    }
    state.last_emitted = current;
    if let Some(listener) = &state.listener {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "notifications/tools/list_changed"
        });
        if listener.send(frame).is_err() {
            debug!(session = %state.session_id, "catalogue listener closed");
            state.listener = None;
        }
    }
}

/// Build a session catalogue from the resolved selection and the discovery
/// results for its spaces. `outcomes` is in `selection.spaces` order; the
/// 1-based position is the endpoint index baked into outward names.
pub fn build_catalogue(
    selection: &ToolSelection,
    outcomes: &[DiscoveryOutcome],
) -> Vec<CallableTool> {
    let definitions = builtin_definitions();
    let mut catalogue = Vec::new();

    for id in &selection.builtin_ids {
        let Some(definition) = definitions.iter().find(|d| d.name == id) else {
            debug!(tool = %id, "selection names an unknown built-in; skipping");
            continue;
        };
        catalogue.push(CallableTool {
            outward_name: definition.name.to_string(),
            description: definition.description.to_string(),
            schema: definition.input_schema.clone(),
            backend: ToolBackend::BuiltIn {
                id: definition.name.to_string(),
            },
            enabled: true,
        });
    }

    for (position, outcome) in outcomes.iter().enumerate() {
        let endpoint_index = position + 1;
        let (Some(metadata), Some(tools)) = (&outcome.metadata, &outcome.tools) else {
            continue;
        };
        for descriptor in tools {
            catalogue.push(CallableTool {
                outward_name: outward_name(endpoint_index, metadata.private, &descriptor.name),
                description: descriptor.description.clone(),
                schema: descriptor.input_schema.clone(),
                backend: ToolBackend::Dynamic {
                    space_ref: outcome.space_ref.clone(),
                    subdomain: metadata.subdomain.clone(),
                    tool_name: descriptor.name.clone(),
                    private: metadata.private,
                },
                enabled: true,
            });
        }
    }

    catalogue
}

#[cfg(test)]
mod tests {
    use super::*;
    use skybridge_core::spaces::{SpaceMetadata, ToolDescriptor};
    use tokio::sync::mpsc;

    use crate::builtins::TOOL_REPO_SEARCH;
    use crate::selection::SettingsSource;

    fn metadata(raw_ref: &str, private: bool) -> SpaceMetadata {
        SpaceMetadata {
            space_ref: SpaceRef::parse(raw_ref).unwrap(),
            subdomain: raw_ref.replace('/', "-"),
            sdk: "gradio".to_string(),
            private,
            emoji: None,
            title: None,
            runtime_stage: None,
            etag: None,
        }
    }

    fn outcome(raw_ref: &str, private: bool, tool_names: &[&str]) -> DiscoveryOutcome {
        DiscoveryOutcome {
            space_ref: SpaceRef::parse(raw_ref).unwrap(),
            metadata: Some(metadata(raw_ref, private)),
            tools: Some(
                tool_names
                    .iter()
                    .map(|name| ToolDescriptor {
                        name: name.to_string(),
                        description: format!("{name} tool"),
                        input_schema: json!({"type": "object", "properties": {}, "required": []}),
                    })
                    .collect(),
            ),
            error: None,
        }
    }

    fn selection(builtins: &[&str]) -> ToolSelection {
        ToolSelection {
            builtin_ids: builtins.iter().map(|s| s.to_string()).collect(),
            spaces: vec![],
            source: SettingsSource::None,
        }
    }

    #[test]
    fn outward_names_are_deterministic_and_mark_private_spaces() {
        assert_eq!(outward_name(1, false, "generate"), "gr1_generate");
        assert_eq!(outward_name(2, true, "generate"), "gr2p_generate");
        assert_eq!(outward_name(2, true, "generate"), outward_name(2, true, "generate"));
    }

    #[test]
    fn catalogue_combines_builtins_and_dynamic_tools_in_order() {
        let outcomes = vec![
            outcome("acme/first", false, &["generate", "upscale"]),
            outcome("acme/second", true, &["translate"]),
        ];
        let catalogue = build_catalogue(&selection(&[TOOL_REPO_SEARCH]), &outcomes);

        let names: Vec<&str> = catalogue.iter().map(|t| t.outward_name.as_str()).collect();
        assert_eq!(
            names,
            vec![TOOL_REPO_SEARCH, "gr1_generate", "gr1_upscale", "gr2p_translate"]
        );
    }

    #[test]
    fn failed_spaces_contribute_no_tools_but_keep_their_index() {
        let failed = DiscoveryOutcome {
            space_ref: SpaceRef::parse("acme/broken").unwrap(),
            metadata: None,
            tools: None,
            error: Some("hub returned HTTP 500".to_string()),
        };
        let outcomes = vec![failed, outcome("acme/ok", false, &["generate"])];
        let catalogue = build_catalogue(&selection(&[]), &outcomes);

        // The healthy space sits at position 2, so its index stays 2 even
        // though the broken space produced nothing.
        assert_eq!(catalogue.len(), 1);
        assert_eq!(catalogue[0].outward_name, "gr2_generate");
    }

    #[test]
    fn first_install_sets_baseline_without_notifying() {
        let session = Session::new("s-1".to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.set_listener(tx);

        session.install_catalogue(build_catalogue(
            &selection(&[TOOL_REPO_SEARCH]),
            &[outcome("acme/demo", false, &["generate"])],
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn list_changed_fires_iff_the_enabled_set_changes() {
        let session = Session::new("s-1".to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.set_listener(tx);
        session.install_catalogue(build_catalogue(
            &selection(&[TOOL_REPO_SEARCH]),
            &[outcome("acme/demo", false, &["generate"])],
        ));

        assert_eq!(session.set_enabled("gr1_generate", false), Some(true));
        let frame = rx.try_recv().expect("disable should notify");
        assert_eq!(frame["method"], "notifications/tools/list_changed");

        // Disabling an already-disabled tool changes nothing.
        assert_eq!(session.set_enabled("gr1_generate", false), Some(false));
        assert!(rx.try_recv().is_err());

        assert_eq!(session.set_enabled("gr1_generate", true), Some(true));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn disabled_tools_vanish_from_listing_but_stay_resolvable() {
        let session = Session::new("s-1".to_string());
        session.install_catalogue(build_catalogue(
            &selection(&[]),
            &[outcome("acme/demo", false, &["generate"])],
        ));
        session.set_enabled("gr1_generate", false).unwrap();

        let listed = session.tools_list_payload();
        assert_eq!(listed["tools"].as_array().unwrap().len(), 0);

        let tool = session.lookup("gr1_generate").expect("entry still exists");
        assert!(!tool.enabled);
    }

    #[test]
    fn unknown_tool_enable_reports_not_found() {
        let session = Session::new("s-1".to_string());
        session.install_catalogue(vec![]);
        assert_eq!(session.set_enabled("gr9_missing", true), None);
    }

    #[test]
    fn reinstall_with_same_enabled_set_stays_quiet() {
        let session = Session::new("s-1".to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.set_listener(tx);
        let tools =
            build_catalogue(&selection(&[]), &[outcome("acme/demo", false, &["generate"])]);
        session.install_catalogue(tools.clone());
        session.install_catalogue(tools);
        assert!(rx.try_recv().is_err());

        session.install_catalogue(vec![]);
        assert!(rx.try_recv().is_ok());
    }
}
