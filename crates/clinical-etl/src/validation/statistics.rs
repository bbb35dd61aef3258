//! Completeness statistics gathered during validation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Presence counts for one required field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCount {
    pub total: usize,
    pub missing: usize,
}

impl FieldCount {
    /// Share of records missing the field, rounded to two places.
    pub fn fraction_missing(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.missing as f64 / self.total as f64 * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCases {
    pub complete_cases: usize,
    pub total_cases: usize,
}

/// Run-level completeness statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// type → field → counts.
    pub required_but_missing: IndexMap<String, IndexMap<String, FieldCount>>,
    pub schemas_used: Vec<String>,
    pub schemas_not_used: Vec<String>,
    /// Root labels of cases missing at least one required field.
    pub cases_missing_data: Vec<String>,
    pub summary_cases: SummaryCases,
}

/// One row of the completeness report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletenessRow {
    #[serde(rename = "Schema")]
    pub schema: String,
    #[serde(rename = "Field")]
    pub field: String,
    #[serde(rename = "Total")]
    pub total: usize,
    #[serde(rename = "Missing")]
    pub missing: usize,
    #[serde(rename = "Fraction_missing")]
    pub fraction_missing: f64,
}

impl Statistics {
    pub(crate) fn mark_used(&mut self, tag: &str) {
        self.required_but_missing.entry(tag.to_string()).or_default();
        if !self.schemas_used.iter().any(|s| s == tag) {
            self.schemas_used.push(tag.to_string());
        }
    }

    pub(crate) fn count_field(&mut self, tag: &str, field: &str, missing: bool) {
        let count = self
            .required_but_missing
            .entry(tag.to_string())
            .or_default()
            .entry(field.to_string())
            .or_default();
        count.total += 1;
        if missing {
            count.missing += 1;
        }
    }

    pub(crate) fn mark_case_missing(&mut self, case: &str) {
        if !self.cases_missing_data.iter().any(|c| c == case) {
            self.cases_missing_data.push(case.to_string());
        }
    }

    /// Flatten `required_but_missing` into report rows.
    pub fn completeness_rows(&self) -> Vec<CompletenessRow> {
        self.required_but_missing
            .iter()
            .flat_map(|(schema, fields)| {
                fields.iter().map(move |(field, count)| CompletenessRow {
                    schema: schema.clone(),
                    field: field.clone(),
                    total: count.total,
                    missing: count.missing,
                    fraction_missing: count.fraction_missing(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_missing_rounds() {
        assert_eq!(FieldCount { total: 3, missing: 1 }.fraction_missing(), 0.33);
        assert_eq!(FieldCount { total: 3, missing: 2 }.fraction_missing(), 0.67);
        assert_eq!(FieldCount { total: 0, missing: 0 }.fraction_missing(), 0.0);
    }

    #[test]
    fn test_completeness_rows() {
        let mut stats = Statistics::default();
        stats.mark_used("donors");
        stats.count_field("donors", "gender", false);
        stats.count_field("donors", "gender", true);
        stats.count_field("donors", "sex_at_birth", false);

        let rows = stats.completeness_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].field, "gender");
        assert_eq!(rows[0].fraction_missing, 0.5);
        assert_eq!(stats.schemas_used, vec!["donors"]);
    }
}
