//! Loading OpenAPI documents and converting one component to JSON Schema.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::validation::RuleTable;

const COMPONENT_PREFIX: &str = "#/components/schemas/";
const DEFS_PREFIX: &str = "#/$defs/";

/// Guard against self-referential components when expanding shapes.
const MAX_SHAPE_DEPTH: usize = 32;

static COMMIT_SHA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"Based on (?:commit "([^"]+)"|http\S*katsu/([^/\s]+)/chord_metadata_service)"#).unwrap()
});

/// Simplified structure of a schema component, used to lay out templates.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// A scalar with its JSON type name.
    Primitive(String),
    /// An object; nested record types are ordered after plain fields.
    Object {
        properties: IndexMap<String, Shape>,
        required: Vec<String>,
    },
    Array(Box<Shape>),
}

/// An OpenAPI document with one component selected as the record schema.
#[derive(Debug, Clone)]
pub struct OpenApiSchema {
    /// URL or path the document was read from.
    pub source: String,
    /// Name of the component records are validated against.
    pub component: String,
    /// `components.schemas` as written in the document.
    pub components: Map<String, Value>,
    /// The component as a JSON Schema with every component under `$defs`.
    pub json_schema: Value,
    /// Commit the document was generated from, if it says so.
    pub commit_sha: Option<String>,
}

impl OpenApiSchema {
    /// Load from a URL (`http://`, `https://`) or a local YAML/JSON file.
    pub fn load(source: &str, component: &str) -> Result<Self> {
        let text = if source.starts_with("http://") || source.starts_with("https://") {
            fetch(source)?
        } else {
            let path = Path::new(source);
            fs::read_to_string(path).map_err(|e| EtlError::io(path, e))?
        };
        let schema = Self::from_text(source, &text, component)?;
        info!(source, component, "loaded schema");
        Ok(schema)
    }

    /// Parse document text. JSON documents parse as YAML too.
    pub fn from_text(source: &str, text: &str, component: &str) -> Result<Self> {
        let document: Value = serde_yaml::from_str(text)?;
        let components = document
            .pointer("/components/schemas")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| EtlError::Schema(format!("{source} has no components.schemas")))?;
        let root = components.get(component).ok_or_else(|| {
            EtlError::Schema(format!("{source} has no component named {component}"))
        })?;

        let mut json_schema = convert(root);
        let defs: Map<String, Value> = components
            .iter()
            .map(|(name, def)| (name.clone(), convert(def)))
            .collect();
        if let Value::Object(obj) = &mut json_schema {
            obj.insert("$defs".to_string(), Value::Object(defs));
        }

        let commit_sha = document
            .pointer("/info/description")
            .and_then(Value::as_str)
            .and_then(|d| COMMIT_SHA.captures(d))
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string());

        Ok(Self {
            source: source.to_string(),
            component: component.to_string(),
            components,
            json_schema,
            commit_sha,
        })
    }

    /// Compile the JSON Schema for validation (Draft 2020-12).
    pub fn validator(&self) -> Result<jsonschema::Validator> {
        jsonschema::draft202012::new(&self.json_schema)
            .map_err(|e| EtlError::Schema(format!("could not compile {}: {e}", self.component)))
    }

    /// Shape of the selected component. Properties named as nested types in
    /// `rules` are moved after the plain fields of their parent.
    pub fn shape(&self, rules: &RuleTable) -> Shape {
        let root = self.components.get(&self.component).unwrap_or(&Value::Null);
        self.shape_of(root, rules.root_name(), rules, 0)
    }

    fn shape_of(&self, node: &Value, tag: &str, rules: &RuleTable, depth: usize) -> Shape {
        if depth > MAX_SHAPE_DEPTH {
            debug!(tag, "schema nesting too deep; truncating");
            return Shape::Primitive("unknown".to_string());
        }

        if let Some(ty) = type_name(node) {
            return match ty {
                "object" => self.object_shape(node, tag, rules, depth),
                "array" => Shape::Array(Box::new(self.shape_of(
                    node.get("items").unwrap_or(&Value::Null),
                    tag,
                    rules,
                    depth + 1,
                ))),
                other => Shape::Primitive(other.to_string()),
            };
        }
        if let Some(name) = node.get("$ref").and_then(Value::as_str) {
            let name = name.trim_start_matches(COMPONENT_PREFIX);
            return match self.components.get(name) {
                Some(target) => self.shape_of(target, tag, rules, depth + 1),
                None => Shape::Primitive("unknown".to_string()),
            };
        }
        for combinator in ["allOf", "oneOf", "anyOf"] {
            if let Some(first) = node.get(combinator).and_then(|v| v.get(0)) {
                return self.shape_of(first, tag, rules, depth + 1);
            }
        }
        Shape::Primitive("unknown".to_string())
    }

    fn object_shape(&self, node: &Value, tag: &str, rules: &RuleTable, depth: usize) -> Shape {
        let mut properties = IndexMap::new();
        if let Some(props) = node.get("properties").and_then(Value::as_object) {
            for (name, prop) in props {
                properties.insert(name.clone(), self.shape_of(prop, name, rules, depth + 1));
            }
        }
        if let Some(rule) = rules.get(tag) {
            for nested in &rule.nested_types {
                if let Some(shape) = properties.shift_remove(nested) {
                    properties.insert(nested.clone(), shape);
                }
            }
        }
        let required = node
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        Shape::Object {
            properties,
            required,
        }
    }
}

fn fetch(url: &str) -> Result<String> {
    let http = |message: String| EtlError::Http {
        url: url.to_string(),
        message,
    };
    reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.text())
        .map_err(|e| http(e.to_string()))
}

/// First non-null type name of a node.
fn type_name(node: &Value) -> Option<&str> {
    match node.get("type")? {
        Value::String(s) => Some(s.as_str()),
        Value::Array(types) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    }
}

/// Rewrite component refs to `$defs` and express `nullable: true` the JSON
/// Schema way.
fn convert(node: &Value) -> Value {
    match node {
        Value::Object(obj) => {
            let mut out = Map::new();
            let mut nullable = false;
            for (key, value) in obj {
                match (key.as_str(), value) {
                    ("nullable", Value::Bool(b)) => nullable = *b,
                    ("$ref", Value::String(r)) => {
                        out.insert(key.clone(), Value::String(r.replace(COMPONENT_PREFIX, DEFS_PREFIX)));
                    }
                    _ => {
                        out.insert(key.clone(), convert(value));
                    }
                }
            }
            if nullable {
                allow_null(out)
            } else {
                Value::Object(out)
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(convert).collect()),
        other => other.clone(),
    }
}

fn allow_null(mut node: Map<String, Value>) -> Value {
    if let Some(Value::Array(values)) = node.get_mut("enum") {
        if !values.contains(&Value::Null) {
            values.push(Value::Null);
        }
    }
    match node.get("type").cloned() {
        Some(Value::String(ty)) => {
            node.insert("type".to_string(), json!([ty, "null"]));
            Value::Object(node)
        }
        Some(Value::Array(mut types)) => {
            if !types.contains(&json!("null")) {
                types.push(json!("null"));
            }
            node.insert("type".to_string(), Value::Array(types));
            Value::Object(node)
        }
        _ => json!({ "anyOf": [Value::Object(node), { "type": "null" }] }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::profiles::Profile;

    const DOCUMENT: &str = r##"
openapi: 3.0.3
info:
  title: Test
  description: Based on commit "abc123" of the data model
components:
  schemas:
    Donor:
      type: object
      required: [submitter_donor_id]
      properties:
        submitter_donor_id:
          type: string
        primary_diagnoses:
          type: array
          items:
            $ref: '#/components/schemas/Diagnosis'
        sex_at_birth:
          allOf:
            - $ref: '#/components/schemas/SexEnum'
          nullable: true
        date_of_birth:
          type: object
          nullable: true
          properties:
            month_interval:
              type: integer
    Diagnosis:
      type: object
      properties:
        submitter_primary_diagnosis_id:
          type: string
    SexEnum:
      type: string
      enum: [Male, Female]
"##;

    #[test]
    fn test_refs_and_defs() {
        let schema = OpenApiSchema::from_text("test.yml", DOCUMENT, "Donor").unwrap();
        let items = &schema.json_schema["properties"]["primary_diagnoses"]["items"];
        assert_eq!(items["$ref"], json!("#/$defs/Diagnosis"));
        assert!(schema.json_schema["$defs"]["SexEnum"].is_object());
        assert_eq!(schema.commit_sha.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_nullable_accepts_null() {
        let schema = OpenApiSchema::from_text("test.yml", DOCUMENT, "Donor").unwrap();
        let validator = schema.validator().unwrap();
        let record = json!({
            "submitter_donor_id": "D1",
            "sex_at_birth": null,
            "date_of_birth": null,
            "primary_diagnoses": [{"submitter_primary_diagnosis_id": "P1"}]
        });
        assert!(validator.is_valid(&record));
        assert!(!validator.is_valid(&json!({"submitter_donor_id": 5})));
        assert!(!validator.is_valid(&json!({"sex_at_birth": "Other"})));
    }

    #[test]
    fn test_missing_component() {
        let err = OpenApiSchema::from_text("test.yml", DOCUMENT, "Nope").unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }

    #[test]
    fn test_shape_moves_nested_types_last() {
        let schema = OpenApiSchema::from_text("test.yml", DOCUMENT, "Donor").unwrap();
        let Shape::Object {
            properties,
            required,
        } = schema.shape(&Profile::moh_v3().rules)
        else {
            panic!("component should be an object");
        };
        assert_eq!(required, vec!["submitter_donor_id"]);
        assert_eq!(
            properties.keys().collect::<Vec<_>>(),
            vec!["submitter_donor_id", "sex_at_birth", "date_of_birth", "primary_diagnoses"]
        );
        assert_eq!(properties["sex_at_birth"], Shape::Primitive("string".to_string()));
        assert!(matches!(&properties["primary_diagnoses"], Shape::Array(inner) if matches!(**inner, Shape::Object { .. })));
    }
}
