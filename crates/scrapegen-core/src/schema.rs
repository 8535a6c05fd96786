//! Output schema descriptor
//!
//! A structural type descriptor for the data the generated program must emit.
//! Serialized as JSON, e.g.
//!
//! ```json
//! {"type": "array", "items": {"type": "object", "fields": {
//!     "name":  {"type": "string", "description": "product name"},
//!     "price": {"type": "number"}
//! }}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Schema of the whole program output
pub type OutputSchema = FieldSchema;

/// One node of the schema tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Only meaningful for object fields; absent optional fields are not violations
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Primitive or nested structure of a schema node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array {
        items: Box<FieldSchema>,
    },
    Object {
        #[serde(default)]
        fields: BTreeMap<String, FieldSchema>,
    },
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array { .. } => "array",
            Self::Object { .. } => "object",
        }
    }
}

impl FieldSchema {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: true,
            nullable: false,
            description: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn number() -> Self {
        Self::new(FieldKind::Number)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn array(items: FieldSchema) -> Self {
        Self::new(FieldKind::Array {
            items: Box::new(items),
        })
    }

    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldSchema)>,
        K: Into<String>,
    {
        Self::new(FieldKind::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        })
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Compact rendering used in prompts: each leaf becomes its type name,
    /// annotated with optionality and description.
    pub fn to_simplified(&self) -> Value {
        match &self.kind {
            FieldKind::Array { items } => Value::Array(vec![items.to_simplified()]),
            FieldKind::Object { fields } => {
                let map: Map<String, Value> = fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.to_simplified()))
                    .collect();
                Value::Object(map)
            }
            leaf => {
                let mut label = leaf.type_name().to_string();
                if self.nullable {
                    label.push_str(" | null");
                }
                if !self.required {
                    label.push_str(" (optional)");
                }
                if let Some(desc) = &self.description {
                    label.push_str(": ");
                    label.push_str(desc);
                }
                Value::String(label)
            }
        }
    }

    /// Equivalent JSON Schema (draft 7). `nullable` widens the type with
    /// `"null"`, object fields land in `properties` and `required`. With
    /// `closed`, every object also gets `additionalProperties: false`.
    pub fn to_json_schema(&self, closed: bool) -> Value {
        let mut node = Map::new();
        let type_name = Value::String(self.kind.type_name().to_string());
        let type_value = if self.nullable {
            Value::Array(vec![type_name, Value::String("null".to_string())])
        } else {
            type_name
        };
        node.insert("type".to_string(), type_value);

        match &self.kind {
            FieldKind::Array { items } => {
                node.insert("items".to_string(), items.to_json_schema(closed));
            }
            FieldKind::Object { fields } => {
                let properties: Map<String, Value> = fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.to_json_schema(closed)))
                    .collect();
                let required: Vec<Value> = fields
                    .iter()
                    .filter(|(_, field)| field.required)
                    .map(|(name, _)| Value::String(name.clone()))
                    .collect();
                node.insert("properties".to_string(), Value::Object(properties));
                if !required.is_empty() {
                    node.insert("required".to_string(), Value::Array(required));
                }
                if closed {
                    node.insert("additionalProperties".to_string(), Value::Bool(false));
                }
            }
            _ => {}
        }

        if let Some(desc) = &self.description {
            node.insert("description".to_string(), Value::String(desc.clone()));
        }
        Value::Object(node)
    }

    /// Pretty-printed simplified form
    pub fn render_simplified(&self) -> String {
        serde_json::to_string_pretty(&self.to_simplified())
            .unwrap_or_else(|_| self.kind.type_name().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_schema() -> OutputSchema {
        FieldSchema::array(FieldSchema::object([
            ("name", FieldSchema::string().describe("product name")),
            ("price", FieldSchema::number()),
            ("sku", FieldSchema::string().optional()),
        ]))
    }

    #[test]
    fn test_parse_json_schema() {
        let json = r#"{
            "type": "array",
            "items": {"type": "object", "fields": {
                "name": {"type": "string", "description": "product name"},
                "price": {"type": "number"},
                "sku": {"type": "string", "required": false}
            }}
        }"#;
        let parsed: OutputSchema = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, product_schema());
    }

    #[test]
    fn test_serialize_round_trip_shape() {
        let value = serde_json::to_value(product_schema()).unwrap();
        assert_eq!(value["type"], "array");
        assert_eq!(value["items"]["fields"]["price"]["type"], "number");
    }

    #[test]
    fn test_simplified_rendering() {
        let simplified = product_schema().to_simplified();
        assert_eq!(simplified[0]["name"], "string: product name");
        assert_eq!(simplified[0]["price"], "number");
        assert_eq!(simplified[0]["sku"], "string (optional)");
    }

    #[test]
    fn test_json_schema_rendering() {
        let schema = product_schema().to_json_schema(false);
        assert_eq!(schema["type"], "array");
        let item = &schema["items"];
        assert_eq!(item["type"], "object");
        assert_eq!(item["properties"]["price"], serde_json::json!({"type": "number"}));
        assert_eq!(item["properties"]["name"]["description"], "product name");
        assert_eq!(item["required"], serde_json::json!(["name", "price"]));

        assert!(item.get("additionalProperties").is_none());

        let nullable = FieldSchema::string().nullable().to_json_schema(false);
        assert_eq!(nullable["type"], serde_json::json!(["string", "null"]));

        let closed = product_schema().to_json_schema(true);
        assert_eq!(closed["items"]["additionalProperties"], false);
        assert!(closed.get("additionalProperties").is_none());
    }
}
