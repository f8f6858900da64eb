use serde_json::{Map, Value, json};

use skybridge_core::spaces::ToolDescriptor;

/// Upstream placeholder for anonymous callables; they cannot be invoked, so
/// tools carrying it are dropped during normalization.
const LAMBDA_MARKER: &str = "<lambda";

/// Normalize an upstream schema document into tool descriptors.
///
/// Two shapes arrive in the wild:
/// - array form: `[{ "name", "description"?, "inputSchema" }, ...]`
/// - object form: `{ "<tool_name>": <input schema>, ... }` with the
///   description (if any) embedded inside the schema value.
///
/// Both normalize to the same descriptor list; an empty result is an error
/// because the space then has nothing the proxy can advertise.
pub(crate) fn normalize_schema_document(doc: &Value) -> Result<Vec<ToolDescriptor>, String> {
    let raw: Vec<(String, Option<String>, Value)> = match doc {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let obj = item
                    .as_object()
                    .ok_or_else(|| format!("schema entry [{index}] is not an object"))?;
                let name = obj
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| format!("schema entry [{index}] is missing 'name'"))?;
                let description = obj
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToOwned::to_owned);
                let input_schema = obj
                    .get("inputSchema")
                    .cloned()
                    .ok_or_else(|| format!("schema entry '{name}' is missing 'inputSchema'"))?;
                out.push((name.to_string(), description, input_schema));
            }
            out
        }
        Value::Object(map) => map
            .iter()
            .map(|(name, schema)| {
                let description = schema
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToOwned::to_owned);
                (name.clone(), description, schema.clone())
            })
            .collect(),
        _ => return Err("schema document must be an array or object".to_string()),
    };

    let mut tools = Vec::with_capacity(raw.len());
    for (name, description, input_schema) in raw {
        if name.to_lowercase().contains(LAMBDA_MARKER) {
            continue;
        }
        let input_schema = normalize_input_schema(&name, input_schema)?;
        let description = description.unwrap_or_else(|| format!("{name} tool"));
        tools.push(ToolDescriptor {
            name,
            description,
            input_schema,
        });
    }

    if tools.is_empty() {
        return Err("no usable tools in schema document".to_string());
    }
    Ok(tools)
}

/// An input schema must be object-typed and carry `properties` and
/// `required` (both possibly empty). Missing members are filled in so the
/// two upstream shapes normalize identically.
fn normalize_input_schema(name: &str, schema: Value) -> Result<Value, String> {
    let mut obj = match schema {
        Value::Object(obj) => obj,
        _ => return Err(format!("tool '{name}' input schema is not an object")),
    };
    match obj.get("type") {
        None => {
            obj.insert("type".to_string(), Value::String("object".to_string()));
        }
        Some(Value::String(t)) if t == "object" => {}
        Some(_) => return Err(format!("tool '{name}' input schema is not object-typed")),
    }
    if !obj.get("properties").is_some_and(Value::is_object) {
        obj.insert("properties".to_string(), json!({}));
    }
    if !obj.get("required").is_some_and(Value::is_array) {
        obj.insert("required".to_string(), json!([]));
    }
    Ok(Value::Object(obj))
}

/// Parameter complexity for the one-shot invoke convenience path.
///
/// Simple schemas take flat string/number arguments and can be driven from a
/// JSON string; anything nested needs the full passthrough tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchemaComplexity {
    Simple,
    Complex,
}

pub(crate) fn classify_schema(input_schema: &Value) -> SchemaComplexity {
    let Some(properties) = input_schema.get("properties").and_then(Value::as_object) else {
        return SchemaComplexity::Complex;
    };
    if properties.values().all(is_simple_property) {
        SchemaComplexity::Simple
    } else {
        SchemaComplexity::Complex
    }
}

fn is_simple_property(schema: &Value) -> bool {
    let Some(obj) = schema.as_object() else {
        return false;
    };
    if is_media_reference(obj) {
        return true;
    }
    if let Some(values) = obj.get("enum").and_then(Value::as_array) {
        return values
            .iter()
            .all(|v| v.is_string() || v.is_number() || v.is_boolean());
    }
    matches!(
        obj.get("type").and_then(Value::as_str),
        Some("string") | Some("number") | Some("integer") | Some("boolean")
    )
}

/// Gradio tags file and image parameters with a `title` of `FileData` /
/// `ImageData`; their wire value is a URL string, so they count as simple.
fn is_media_reference(obj: &Map<String, Value>) -> bool {
    matches!(
        obj.get("title").and_then(Value::as_str),
        Some("FileData") | Some("ImageData")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_and_object_forms_normalize_identically() {
        let array_form = json!([
            {
                "name": "generate",
                "description": "Generate an image",
                "inputSchema": {
                    "type": "object",
                    "properties": { "prompt": { "type": "string" } },
                    "required": ["prompt"]
                }
            }
        ]);
        let object_form = json!({
            "generate": {
                "type": "object",
                "description": "Generate an image",
                "properties": { "prompt": { "type": "string" } },
                "required": ["prompt"]
            }
        });

        let from_array = normalize_schema_document(&array_form).unwrap();
        let from_object = normalize_schema_document(&object_form).unwrap();
        assert_eq!(from_array.len(), 1);
        assert_eq!(from_array[0].name, from_object[0].name);
        assert_eq!(from_array[0].description, from_object[0].description);
        assert_eq!(
            from_array[0].input_schema.get("properties"),
            from_object[0].input_schema.get("properties")
        );
        assert_eq!(
            from_array[0].input_schema.get("required"),
            from_object[0].input_schema.get("required")
        );
    }

    #[test]
    fn lambda_tools_are_dropped() {
        let doc = json!([
            { "name": "<lambda>_3", "inputSchema": { "type": "object" } },
            { "name": "predict", "inputSchema": { "type": "object" } }
        ]);
        let tools = normalize_schema_document(&doc).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "predict");
    }

    #[test]
    fn lambda_filter_is_case_insensitive() {
        let doc = json!([
            { "name": "my_<LAMBDA>_fn", "inputSchema": { "type": "object" } },
        ]);
        let err = normalize_schema_document(&doc).expect_err("only tool should be dropped");
        assert!(err.contains("no usable tools"));
    }

    #[test]
    fn missing_description_is_synthesised() {
        let doc = json!([
            { "name": "predict", "inputSchema": { "type": "object" } }
        ]);
        let tools = normalize_schema_document(&doc).unwrap();
        assert_eq!(tools[0].description, "predict tool");
    }

    #[test]
    fn properties_and_required_are_filled_in() {
        let doc = json!([
            { "name": "predict", "inputSchema": { "type": "object" } }
        ]);
        let tools = normalize_schema_document(&doc).unwrap();
        assert_eq!(tools[0].input_schema["properties"], json!({}));
        assert_eq!(tools[0].input_schema["required"], json!([]));
    }

    #[test]
    fn non_object_schema_is_rejected() {
        let doc = json!([
            { "name": "predict", "inputSchema": "not a schema" }
        ]);
        assert!(normalize_schema_document(&doc).is_err());

        let doc = json!([
            { "name": "predict", "inputSchema": { "type": "array" } }
        ]);
        assert!(normalize_schema_document(&doc).is_err());
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(normalize_schema_document(&json!([])).is_err());
        assert!(normalize_schema_document(&json!({})).is_err());
    }

    #[test]
    fn flat_primitive_schemas_are_simple() {
        let schema = json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string" },
                "steps": { "type": "integer" },
                "guidance": { "type": "number" },
                "tiled": { "type": "boolean" },
                "size": { "enum": ["small", "large", 512] }
            },
            "required": ["prompt"]
        });
        assert_eq!(classify_schema(&schema), SchemaComplexity::Simple);
    }

    #[test]
    fn media_references_are_simple() {
        let schema = json!({
            "type": "object",
            "properties": {
                "image": { "title": "ImageData", "type": "object", "properties": { "url": {} } },
                "audio": { "title": "FileData", "type": "object" }
            },
            "required": []
        });
        assert_eq!(classify_schema(&schema), SchemaComplexity::Simple);
    }

    #[test]
    fn nested_objects_and_arrays_are_complex() {
        let nested = json!({
            "type": "object",
            "properties": { "options": { "type": "object", "properties": {} } },
            "required": []
        });
        assert_eq!(classify_schema(&nested), SchemaComplexity::Complex);

        let array_of_objects = json!({
            "type": "object",
            "properties": { "rows": { "type": "array", "items": { "type": "object" } } },
            "required": []
        });
        assert_eq!(classify_schema(&array_of_objects), SchemaComplexity::Complex);

        let union = json!({
            "type": "object",
            "properties": { "input": { "anyOf": [{ "type": "string" }, { "type": "object" }] } },
            "required": []
        });
        assert_eq!(classify_schema(&union), SchemaComplexity::Complex);
    }
}
