use serde_json::{Map, Value};

use crate::builtins::TOOL_REPO_SEARCH;

/// Report of one applied rewrite, for observability only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteReport {
    pub legacy_name: String,
    pub canonical_name: String,
}

/// Rewrite a legacy `tools/call` params object into canonical form.
///
/// Applied at request ingress, before dispatch. Unknown tool names pass
/// through untouched, and the transform is idempotent: canonical names are
/// not legacy names, so a second application is a no-op.
pub fn rewrite_legacy_call(params: &Value) -> (Value, Option<RewriteReport>) {
    let Some(obj) = params.as_object() else {
        return (params.clone(), None);
    };
    let Some(name) = obj.get("name").and_then(Value::as_str) else {
        return (params.clone(), None);
    };

    let rewrite = match legacy_alias(name) {
        Some(rewrite) => rewrite,
        None => return (params.clone(), None),
    };

    let mut out = obj.clone();
    out.insert(
        "name".to_string(),
        Value::String(TOOL_REPO_SEARCH.to_string()),
    );

    if let Some(repo_type) = rewrite.repo_type {
        let mut arguments = match out.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        arguments.insert(
            "repo_types".to_string(),
            Value::Array(vec![Value::String(repo_type.to_string())]),
        );
        merge_into_filters(&mut arguments, rewrite.merged_args);
        out.insert("arguments".to_string(), Value::Object(arguments));
    }

    let report = RewriteReport {
        legacy_name: name.to_string(),
        canonical_name: TOOL_REPO_SEARCH.to_string(),
    };
    (Value::Object(out), Some(report))
}

struct LegacyRewrite {
    /// `None` means the name alone is rewritten and arguments pass through.
    repo_type: Option<&'static str>,
    /// Argument keys whose string (or string-array) values fold into `filters`.
    merged_args: &'static [&'static str],
}

fn legacy_alias(name: &str) -> Option<LegacyRewrite> {
    // Aliases come hyphenated and/or `hf_`-prefixed; fold those away first.
    let mut base = name.to_lowercase().replace('-', "_");
    if let Some(stripped) = base.strip_prefix("hf_") {
        base = stripped.to_string();
    }
    match base.as_str() {
        "model_search" => Some(LegacyRewrite {
            repo_type: Some("model"),
            merged_args: &["task", "library"],
        }),
        "dataset_search" => Some(LegacyRewrite {
            repo_type: Some("dataset"),
            merged_args: &["tags"],
        }),
        "repo_search" => Some(LegacyRewrite {
            repo_type: None,
            merged_args: &[],
        }),
        _ => None,
    }
}

/// Fold the named argument values into `filters`, deduplicated with first
/// occurrence preserved, and remove the originals.
fn merge_into_filters(arguments: &mut Map<String, Value>, keys: &[&str]) {
    let mut filters: Vec<String> = arguments
        .get("filters")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    for key in keys {
        match arguments.remove(*key) {
            Some(Value::String(v)) if !v.trim().is_empty() => filters.push(v),
            Some(Value::Array(items)) => {
                filters.extend(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|s| !s.trim().is_empty())
                        .map(ToOwned::to_owned),
                );
            }
            _ => {}
        }
    }

    let mut deduped: Vec<String> = Vec::with_capacity(filters.len());
    for filter in filters {
        if !deduped.contains(&filter) {
            deduped.push(filter);
        }
    }

    if !deduped.is_empty() || arguments.contains_key("filters") {
        arguments.insert(
            "filters".to_string(),
            Value::Array(deduped.into_iter().map(Value::String).collect()),
        );
    }
}
