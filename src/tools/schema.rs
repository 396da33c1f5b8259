//! First-class schema values used both to validate tool input and to
//! describe a tool to a language model. Neither consumer relies on
//! reflection over native Rust types — the AST is the single source of
//! truth (design notes: "dynamic schema -> typed contracts").

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// A schema node. Composable: `Array`/`Object` nest further nodes,
/// `Optional`/`WithDefault` wrap a node to relax presence requirements.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    String,
    Number,
    Boolean,
    Enum(Vec<String>),
    Array(Box<SchemaNode>),
    Object(ObjectSchema),
    Optional(Box<SchemaNode>),
    WithDefault(Box<SchemaNode>, Value),
}

#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    /// Field name -> schema, in declaration order for stable model-facing output.
    pub fields: Vec<(String, SchemaNode)>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, node: SchemaNode) -> Self {
        self.fields.push((name.into(), node));
        self
    }

    fn is_required(node: &SchemaNode) -> bool {
        !matches!(node, SchemaNode::Optional(_) | SchemaNode::WithDefault(_, _))
    }
}

impl SchemaNode {
    pub fn object(schema: ObjectSchema) -> Self {
        SchemaNode::Object(schema)
    }

    pub fn optional(self) -> Self {
        SchemaNode::Optional(Box::new(self))
    }

    pub fn with_default(self, default: Value) -> Self {
        SchemaNode::WithDefault(Box::new(self), default)
    }

    /// Validate `value` against this schema, collecting every violation
    /// found (rather than failing on the first) so the caller can report a
    /// complete, human-readable list.
    pub fn validate(&self, value: &Value) -> Vec<String> {
        let mut violations = Vec::new();
        self.validate_at("$", value, &mut violations);
        violations
    }

    fn validate_at(&self, path: &str, value: &Value, violations: &mut Vec<String>) {
        match self {
            SchemaNode::Optional(inner) => {
                if !value.is_null() {
                    inner.validate_at(path, value, violations);
                }
            }
            SchemaNode::WithDefault(inner, _) => {
                if !value.is_null() {
                    inner.validate_at(path, value, violations);
                }
            }
            SchemaNode::String => {
                if !value.is_string() {
                    violations.push(format!("{path}: expected string, got {value}"));
                }
            }
            SchemaNode::Number => {
                if !value.is_number() {
                    violations.push(format!("{path}: expected number, got {value}"));
                }
            }
            SchemaNode::Boolean => {
                if !value.is_boolean() {
                    violations.push(format!("{path}: expected boolean, got {value}"));
                }
            }
            SchemaNode::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => {}
                _ => violations.push(format!(
                    "{path}: expected one of {allowed:?}, got {value}"
                )),
            },
            SchemaNode::Array(item_schema) => match value.as_array() {
                Some(items) => {
                    for (idx, item) in items.iter().enumerate() {
                        item_schema.validate_at(&format!("{path}[{idx}]"), item, violations);
                    }
                }
                None => violations.push(format!("{path}: expected array, got {value}")),
            },
            SchemaNode::Object(schema) => match value.as_object() {
                Some(obj) => {
                    for (name, field_schema) in &schema.fields {
                        let field_path = format!("{path}.{name}");
                        match obj.get(name) {
                            Some(field_value) => {
                                field_schema.validate_at(&field_path, field_value, violations)
                            }
                            None => {
                                if ObjectSchema::is_required(field_schema) {
                                    violations.push(format!("{field_path}: missing required field"));
                                }
                            }
                        }
                    }
                }
                None => violations.push(format!("{path}: expected object, got {value}")),
            },
        }
    }

    /// Fill in declared defaults for any object fields missing from `value`.
    pub fn apply_defaults(&self, value: &mut Value) {
        if let SchemaNode::Object(schema) = self {
            if let Some(obj) = value.as_object_mut() {
                for (name, field_schema) in &schema.fields {
                    if let SchemaNode::WithDefault(_, default) = field_schema {
                        obj.entry(name.clone()).or_insert_with(|| default.clone());
                    }
                    if let Some(child) = obj.get_mut(name) {
                        field_schema.apply_defaults(child);
                    }
                }
            }
        }
    }

    /// Render as a JSON-Schema-shaped value suitable for exposing a tool's
    /// input contract to a model.
    pub fn to_model_schema(&self) -> Value {
        match self {
            SchemaNode::String => json!({"type": "string"}),
            SchemaNode::Number => json!({"type": "number"}),
            SchemaNode::Boolean => json!({"type": "boolean"}),
            SchemaNode::Enum(values) => json!({"type": "string", "enum": values}),
            SchemaNode::Array(item) => json!({"type": "array", "items": item.to_model_schema()}),
            SchemaNode::Object(schema) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for (name, node) in &schema.fields {
                    properties.insert(name.clone(), node.to_model_schema());
                    if ObjectSchema::is_required(node) {
                        required.push(name.clone());
                    }
                }
                json!({
                    "type": "object",
                    "properties": Value::Object(properties),
                    "required": required,
                })
            }
            SchemaNode::Optional(inner) => inner.to_model_schema(),
            SchemaNode::WithDefault(inner, default) => {
                let mut rendered = inner.to_model_schema();
                if let Some(obj) = rendered.as_object_mut() {
                    obj.insert("default".to_string(), default.clone());
                }
                rendered
            }
        }
    }
}

/// Convenience constructor mirroring `ObjectSchema::new().field(...)`.
pub fn object(fields: impl IntoIterator<Item = (&'static str, SchemaNode)>) -> SchemaNode {
    let mut schema = ObjectSchema::new();
    for (name, node) in fields {
        schema = schema.field(name, node);
    }
    SchemaNode::object(schema)
}

/// Stable ordering helper used when tests compare rendered schemas.
pub fn sorted_keys(value: &Value) -> BTreeMap<String, Value> {
    value
        .as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_field_missing_is_a_violation() {
        let schema = object([("path", SchemaNode::String)]);
        let violations = schema.validate(&json!({}));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("path"));
    }

    #[test]
    fn optional_field_may_be_absent() {
        let schema = object([
            ("path", SchemaNode::String),
            ("content", SchemaNode::String.optional()),
        ]);
        let violations = schema.validate(&json!({"path": "a.txt"}));
        assert!(violations.is_empty());
    }

    #[test]
    fn enum_rejects_unknown_values() {
        let schema = SchemaNode::Enum(vec!["low".into(), "high".into()]);
        assert!(schema.validate(&json!("medium")).len() == 1);
        assert!(schema.validate(&json!("low")).is_empty());
    }

    #[test]
    fn defaults_are_filled_in() {
        let schema = object([("retries", SchemaNode::Number.with_default(json!(0)))]);
        let mut value = json!({});
        schema.apply_defaults(&mut value);
        assert_eq!(value["retries"], json!(0));
    }
}
