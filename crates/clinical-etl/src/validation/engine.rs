//! Walks record trees alongside a rule table.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::diagnostics::{Diagnostic, Severity};
use super::rules::{RuleContext, RuleTable};
use super::statistics::{Statistics, SummaryCases};
use super::structural::structural_diagnostics;
use crate::mapping::DateOrder;

/// Everything a validation run found.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub diagnostics: Vec<Diagnostic>,
    pub statistics: Statistics,
}

impl ValidationReport {
    /// Rendered failures.
    pub fn errors(&self) -> Vec<String> {
        self.rendered(Severity::Fail)
    }

    /// Rendered warnings.
    pub fn warnings(&self) -> Vec<String> {
        self.rendered(Severity::Warn)
    }

    /// True if nothing failed.
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.severity == Severity::Fail)
    }

    fn rendered(&self, severity: Severity) -> Vec<String> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .map(|d| d.to_string())
            .collect()
    }
}

/// Validates record trees: JSON Schema first, then per-type business rules.
pub struct ValidationEngine {
    rules: RuleTable,
    validator: Option<jsonschema::Validator>,
    date_order: DateOrder,
}

/// Mutable state of one run.
struct Run {
    ctx: RuleContext,
    statistics: Statistics,
    identifiers: IndexMap<String, IndexMap<String, usize>>,
}

impl ValidationEngine {
    pub fn new(rules: RuleTable) -> Self {
        Self {
            rules,
            validator: None,
            date_order: DateOrder::default(),
        }
    }

    /// Also check every root record against a compiled JSON Schema.
    pub fn with_schema(mut self, validator: jsonschema::Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Order used to read date strings in records.
    pub fn with_date_order(mut self, date_order: DateOrder) -> Self {
        self.date_order = date_order;
        self
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Validate root records. Problems are reported, never raised.
    pub fn validate(&self, records: &[Value]) -> ValidationReport {
        let mut run = Run {
            ctx: RuleContext::new(self.date_order),
            statistics: Statistics::default(),
            identifiers: IndexMap::new(),
        };
        let root = self.rules.root_name();

        for (index, record) in records.iter().enumerate() {
            if let Some(validator) = &self.validator {
                run.ctx.diagnostics.extend(structural_diagnostics(
                    validator,
                    record,
                    index,
                    &self.rules,
                ));
            }
            let mut record = record.clone();
            if let Value::Object(node) = &mut record {
                self.validate_node(root, node, index, &mut run);
            }
        }

        for (tag, counts) in &run.identifiers {
            for (id, n) in counts.iter().filter(|(_, n)| **n > 1) {
                run.ctx.diagnostics.push(Diagnostic::new(
                    Severity::Fail,
                    Vec::new(),
                    format!("Duplicated IDs: in schema {tag}, {id} occurs {n} times"),
                ));
            }
        }

        let mut statistics = run.statistics;
        statistics.schemas_not_used = self
            .rules
            .tags()
            .filter(|t| !statistics.schemas_used.iter().any(|u| u == *t))
            .map(String::from)
            .collect();
        statistics.summary_cases = SummaryCases {
            complete_cases: records.len() - statistics.cases_missing_data.len().min(records.len()),
            total_cases: records.len(),
        };

        let report = ValidationReport {
            diagnostics: run.ctx.diagnostics,
            statistics,
        };
        info!(
            errors = report.errors().len(),
            warnings = report.warnings().len(),
            "validation finished"
        );
        report
    }

    fn validate_node(&self, tag: &str, node: &mut Map<String, Value>, index: usize, run: &mut Run) {
        let Some(rule) = self.rules.get(tag) else {
            return;
        };

        let mut label = format!("{} {index}", rule.name);
        if let Some(id) = rule
            .id_field
            .as_ref()
            .and_then(|f| node.get(f))
            .and_then(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
        {
            *run
                .identifiers
                .entry(tag.to_string())
                .or_default()
                .entry(id.clone())
                .or_default() += 1;
            label = id;
        }
        debug!(tag, record = %label, "validating");
        run.ctx.location.push(label);
        let case = run.ctx.location[0].clone();
        run.statistics.mark_used(tag);

        let mut inserted = Vec::new();
        for field in &rule.required_fields {
            let missing = !node.contains_key(field);
            run.statistics.count_field(tag, field, missing);
            if missing {
                run.statistics.mark_case_missing(&case);
                node.insert(field.clone(), Value::Null);
                inserted.push(field);
            }
        }
        if let Some(handler) = &rule.handler {
            handler.validate(node, &mut run.ctx);
        }
        for field in inserted.iter().rev() {
            node.remove(*field);
        }

        for nested in &rule.nested_types {
            match node.get_mut(nested) {
                Some(Value::Array(items)) => {
                    for (i, item) in items.iter_mut().enumerate() {
                        if let Value::Object(child) = item {
                            self.validate_node(nested, child, i, run);
                        }
                    }
                }
                Some(Value::Object(child)) => self.validate_node(nested, child, 0, run),
                _ => {}
            }
        }
        run.ctx.location.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::rules::ValidationRule;
    use serde_json::json;

    fn rules() -> RuleTable {
        RuleTable::new()
            .with(
                "donors",
                ValidationRule::new(Some("submitter_donor_id"), "Donor")
                    .required(&["submitter_donor_id", "gender"])
                    .nested(&["treatments"])
                    .with_handler(|node: &Map<String, Value>, ctx: &mut RuleContext| {
                        if node.get("gender").is_some_and(Value::is_null) {
                            ctx.warn("gender is missing");
                        }
                    }),
            )
            .with(
                "treatments",
                ValidationRule::new(Some("submitter_treatment_id"), "Treatment")
                    .required(&["treatment_type"]),
            )
            .with("surgeries", ValidationRule::new(None, "Surgery"))
    }

    #[test]
    fn test_missing_required_fields_seen_as_null_then_removed() {
        let records = vec![json!({"submitter_donor_id": "D1"})];
        let report = ValidationEngine::new(rules()).validate(&records);

        assert_eq!(report.warnings(), vec!["D1: gender is missing"]);
        let gender = report.statistics.required_but_missing["donors"]["gender"];
        assert_eq!((gender.total, gender.missing), (1, 1));
        assert_eq!(report.statistics.cases_missing_data, vec!["D1"]);
        assert_eq!(records[0], json!({"submitter_donor_id": "D1"}));
    }

    #[test]
    fn test_duplicate_ids_and_schema_usage() {
        let records = vec![json!({
            "submitter_donor_id": "D1",
            "gender": "Woman",
            "treatments": [
                {"submitter_treatment_id": "T1", "treatment_type": ["Surgery"]},
                {"submitter_treatment_id": "T1", "treatment_type": ["Surgery"]}
            ]
        })];
        let report = ValidationEngine::new(rules()).validate(&records);

        assert_eq!(
            report.errors(),
            vec!["Duplicated IDs: in schema treatments, T1 occurs 2 times"]
        );
        assert!(!report.is_valid());
        assert_eq!(report.statistics.schemas_used, vec!["donors", "treatments"]);
        assert_eq!(report.statistics.schemas_not_used, vec!["surgeries"]);
        assert_eq!(
            report.statistics.summary_cases,
            SummaryCases { complete_cases: 1, total_cases: 1 }
        );
    }

    #[test]
    fn test_duplicate_ids_are_counted_across_donors() {
        let records = vec![
            json!({
                "submitter_donor_id": "D1",
                "gender": "Woman",
                "treatments": [{"submitter_treatment_id": "T1", "treatment_type": ["Surgery"]}]
            }),
            json!({
                "submitter_donor_id": "D2",
                "gender": "Man",
                "treatments": [{"submitter_treatment_id": "T1", "treatment_type": ["Radiation therapy"]}]
            }),
        ];
        let report = ValidationEngine::new(rules()).validate(&records);

        assert_eq!(
            report.errors(),
            vec!["Duplicated IDs: in schema treatments, T1 occurs 2 times"]
        );
        assert_eq!(
            report.statistics.summary_cases,
            SummaryCases { complete_cases: 2, total_cases: 2 }
        );
    }

    #[test]
    fn test_records_without_ids_are_labelled_by_position() {
        let records = vec![json!({"gender": null})];
        let report = ValidationEngine::new(rules()).validate(&records);
        assert_eq!(report.warnings(), vec!["Donor 0: gender is missing"]);
        // a present-but-null required field is not counted as missing
        assert_eq!(report.statistics.required_but_missing["donors"]["gender"].missing, 0);
    }

    #[test]
    fn test_schema_errors_come_first() {
        let schema = json!({"type": "object", "properties": {"gender": {"type": "string"}}});
        let validator = jsonschema::draft202012::new(&schema).unwrap();
        let records = vec![json!({"submitter_donor_id": "D1", "gender": 3})];
        let report = ValidationEngine::new(rules())
            .with_schema(validator)
            .validate(&records);
        assert_eq!(report.errors().len(), 1);
        assert!(report.errors()[0].starts_with("D1 > gender: "));
    }
}
