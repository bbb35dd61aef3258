//! JSON Schema validation of whole records, located through the rule table.

use serde_json::Value;

use super::diagnostics::{Diagnostic, Severity};
use super::rules::RuleTable;

/// Validate one root record against the compiled schema.
pub fn structural_diagnostics(
    validator: &jsonschema::Validator,
    record: &Value,
    index: usize,
    rules: &RuleTable,
) -> Vec<Diagnostic> {
    validator
        .iter_errors(record)
        .map(|error| {
            let pointer = error.instance_path.to_string();
            let location = locate(record, index, &pointer_segments(&pointer), rules);
            Diagnostic::new(Severity::Fail, location, error.to_string())
        })
        .collect()
}

/// Breadcrumb for an instance path: record ids replace array indices.
fn locate(record: &Value, index: usize, segments: &[String], rules: &RuleTable) -> Vec<String> {
    let root_label = rules
        .root()
        .map(|rule| {
            rule.id_field
                .as_ref()
                .and_then(|f| record.get(f))
                .and_then(label_of)
                .unwrap_or_else(|| format!("{} {index}", rule.name))
        })
        .unwrap_or_else(|| index.to_string());
    let mut location = vec![root_label];

    let mut current = record;
    let mut rest = segments;
    while rest.len() > 1 {
        let key = &rest[0];
        rest = &rest[1..];
        current = current.get(key.as_str()).unwrap_or(&Value::Null);

        let Some(idx) = current
            .as_array()
            .and_then(|_| rest.first())
            .and_then(|s| s.parse::<usize>().ok())
        else {
            continue;
        };
        rest = &rest[1..];
        current = current.get(idx).unwrap_or(&Value::Null);

        let label = match rules.get(key) {
            Some(rule) => rule
                .id_field
                .as_ref()
                .and_then(|f| current.get(f))
                .and_then(label_of)
                .unwrap_or_else(|| format!("{key}[{idx}]")),
            None => key.clone(),
        };
        location.push(label);
    }
    if let Some(last) = rest.first() {
        location.push(last.clone());
    }
    location
}

fn label_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn pointer_segments(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}
