// JSON-Schema-fragment contract used to describe tool parameters and
// structured-output shapes to a provider.
//
// Rather than hand-writing one `serde_json::json!` literal per tool,
// this trait lets any Rust type describe its own wire schema once and
// have it reused both for `ToolDefinition::parameters` and for the
// structured-output helper's native-JSON-mode request.

use crate::json::JsonValue;

/// Implemented by any type that can describe itself as a JSON Schema
/// fragment. Hand-implement this for request parameter types; a derive
/// macro is out of scope here.
pub trait JsonSchema {
    fn json_schema() -> JsonValue;
}

/// Builder for the common `{"type": "object", "properties": {...},
/// "required": [...]}` shape, so adapters and callers don't hand-roll
/// the same four fields every time.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchemaBuilder {
    properties: Vec<(String, JsonValue)>,
    required: Vec<String>,
    description: Option<String>,
}

impl ObjectSchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, schema: JsonValue) -> Self {
        self.properties.push((name.into(), schema));
        self
    }

    pub fn required_property(mut self, name: impl Into<String>, schema: JsonValue) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.push((name, schema));
        self
    }

    pub fn build(self) -> JsonValue {
        let mut fields = vec![
            ("type".to_string(), JsonValue::from("object")),
            (
                "properties".to_string(),
                JsonValue::Object(self.properties),
            ),
            (
                "required".to_string(),
                JsonValue::Array(self.required.into_iter().map(JsonValue::from).collect()),
            ),
            ("additionalProperties".to_string(), JsonValue::from(false)),
        ];
        if let Some(desc) = self.description {
            fields.push(("description".to_string(), JsonValue::from(desc)));
        }
        JsonValue::Object(fields)
    }
}

/// Leaf schema helpers for primitive JSON-Schema types.
pub fn string_schema(description: Option<&str>) -> JsonValue {
    primitive_schema("string", description)
}

pub fn number_schema(description: Option<&str>) -> JsonValue {
    primitive_schema("number", description)
}

pub fn integer_schema(description: Option<&str>) -> JsonValue {
    primitive_schema("integer", description)
}

pub fn boolean_schema(description: Option<&str>) -> JsonValue {
    primitive_schema("boolean", description)
}

pub fn array_schema(items: JsonValue, description: Option<&str>) -> JsonValue {
    let mut fields = vec![
        ("type".to_string(), JsonValue::from("array")),
        ("items".to_string(), items),
    ];
    if let Some(desc) = description {
        fields.push(("description".to_string(), JsonValue::from(desc)));
    }
    JsonValue::Object(fields)
}

pub fn enum_schema(values: &[&str], description: Option<&str>) -> JsonValue {
    let mut fields = vec![
        ("type".to_string(), JsonValue::from("string")),
        (
            "enum".to_string(),
            JsonValue::Array(values.iter().map(|v| JsonValue::from(*v)).collect()),
        ),
    ];
    if let Some(desc) = description {
        fields.push(("description".to_string(), JsonValue::from(desc)));
    }
    JsonValue::Object(fields)
}

/// Enumerated-integer leaf, the `options`-decoration counterpart of
/// [`enum_schema`] for integer-backed enums.
pub fn integer_enum_schema(values: &[i64], description: Option<&str>) -> JsonValue {
    let mut fields = vec![
        ("type".to_string(), JsonValue::from("integer")),
        (
            "enum".to_string(),
            JsonValue::Array(values.iter().map(|v| JsonValue::from(*v)).collect()),
        ),
    ];
    if let Some(desc) = description {
        fields.push(("description".to_string(), JsonValue::from(desc)));
    }
    JsonValue::Object(fields)
}

fn primitive_schema(type_name: &'static str, description: Option<&str>) -> JsonValue {
    let mut fields = vec![("type".to_string(), JsonValue::from(type_name))];
    if let Some(desc) = description {
        fields.push(("description".to_string(), JsonValue::from(desc)));
    }
    JsonValue::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_object_schema_with_required_fields() {
        let schema = ObjectSchemaBuilder::new()
            .description("search the codebase")
            .required_property("query", string_schema(Some("search text")))
            .property("limit", integer_schema(None))
            .build();

        assert_eq!(schema.get("type").and_then(|v| v.as_str()), Some("object"));
        let required = schema.get("required").and_then(|v| v.as_array()).unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0].as_str(), Some("query"));
    }

    #[test]
    fn derive_style_impl_round_trips() {
        struct SearchParams;
        impl JsonSchema for SearchParams {
            fn json_schema() -> JsonValue {
                ObjectSchemaBuilder::new()
                    .required_property("query", string_schema(None))
                    .build()
            }
        }

        let schema = SearchParams::json_schema();
        assert!(schema.get("properties").is_some());
    }
}
