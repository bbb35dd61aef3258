//! Declarative per-type rule tables and the context handlers report into.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::diagnostics::{Diagnostic, Severity};
use crate::mapping::DateOrder;
use crate::mapping::dates::parse_date;

/// Business rules for one record type.
pub trait RuleHandler: Send + Sync {
    /// Inspect one record and report through `ctx`.
    fn validate(&self, node: &Map<String, Value>, ctx: &mut RuleContext);
}

impl<F> RuleHandler for F
where
    F: Fn(&Map<String, Value>, &mut RuleContext) + Send + Sync,
{
    fn validate(&self, node: &Map<String, Value>, ctx: &mut RuleContext) {
        self(node, ctx)
    }
}

/// What validation knows about one record type.
#[derive(Clone)]
pub struct ValidationRule {
    /// Field holding the record's identifier, if it has one.
    pub id_field: Option<String>,
    /// Display name, used to label records without an identifier.
    pub name: String,
    /// Fields counted for completeness.
    pub required_fields: Vec<String>,
    /// Properties holding nested records of other types.
    pub nested_types: Vec<String>,
    pub handler: Option<Arc<dyn RuleHandler>>,
}

impl ValidationRule {
    pub fn new(id_field: Option<&str>, name: &str) -> Self {
        Self {
            id_field: id_field.map(String::from),
            name: name.to_string(),
            required_fields: Vec::new(),
            nested_types: Vec::new(),
            handler: None,
        }
    }

    pub fn required(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn nested(mut self, types: &[&str]) -> Self {
        self.nested_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_handler(mut self, handler: impl RuleHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("id_field", &self.id_field)
            .field("name", &self.name)
            .field("required_fields", &self.required_fields)
            .field("nested_types", &self.nested_types)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Rules keyed by type tag. The first entry is the root record type.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: IndexMap<String, ValidationRule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: &str, rule: ValidationRule) -> Self {
        self.rules.insert(tag.to_string(), rule);
        self
    }

    pub fn get(&self, tag: &str) -> Option<&ValidationRule> {
        self.rules.get(tag)
    }

    /// Tag of the root record type.
    pub fn root_name(&self) -> &str {
        self.rules.keys().next().map(String::as_str).unwrap_or_default()
    }

    pub fn root(&self) -> Option<&ValidationRule> {
        self.rules.values().next()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Where a handler is, and where it reports to.
#[derive(Debug, Clone)]
pub struct RuleContext {
    /// Breadcrumb of the record being validated.
    pub location: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub date_order: DateOrder,
}

impl RuleContext {
    pub fn new(date_order: DateOrder) -> Self {
        Self {
            location: Vec::new(),
            diagnostics: Vec::new(),
            date_order,
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.report(Severity::Warn, message.into());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.report(Severity::Fail, message.into());
    }

    fn report(&mut self, severity: Severity, message: String) {
        self.diagnostics
            .push(Diagnostic::new(severity, self.location.clone(), message));
    }

    /// Read a date field: a `{month_interval}` object or a date string.
    pub fn date_point(&self, value: Option<&Value>) -> Option<DatePoint> {
        match value? {
            Value::Object(obj) => obj.get("month_interval")?.as_i64().map(DatePoint::Interval),
            Value::String(s) if !s.trim().is_empty() => {
                parse_date(s, self.date_order).map(DatePoint::Date)
            }
            _ => None,
        }
    }
}

/// A comparable point in time as it appears in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePoint {
    /// Months relative to the subject's reference date.
    Interval(i64),
    Date(NaiveDate),
}

impl PartialOrd for DatePoint {
    /// Points of different kinds are not comparable.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (DatePoint::Interval(a), DatePoint::Interval(b)) => Some(a.cmp(b)),
            (DatePoint::Date(a), DatePoint::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// True for a `Yes` (or boolean true) answer.
pub fn is_yes(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Bool(true))) || value.and_then(Value::as_str) == Some("Yes")
}

/// True for a `No`/`Not available` (or boolean false) answer.
pub fn is_no(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Bool(false)))
        || matches!(value.and_then(Value::as_str), Some("No" | "Not available"))
}

/// True if the field is present and not null.
pub fn has(node: &Map<String, Value>, field: &str) -> bool {
    node.get(field).is_some_and(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_date_points_compare_only_same_kind() {
        let ctx = RuleContext::new(DateOrder::Dmy);
        let a = ctx.date_point(Some(&json!({"month_interval": 3}))).unwrap();
        let b = ctx.date_point(Some(&json!({"month_interval": 5}))).unwrap();
        let c = ctx.date_point(Some(&json!("2020-01"))).unwrap();
        assert!(a < b);
        assert_eq!(a.partial_cmp(&c), None);
        assert!(!(a < c) && !(a > c));
        assert_eq!(ctx.date_point(Some(&Value::Null)), None);
    }

    #[test]
    fn test_context_reports_with_location() {
        let mut ctx = RuleContext::new(DateOrder::Dmy);
        ctx.location.push("D1".to_string());
        ctx.warn("something missing");
        ctx.fail("something wrong");
        assert_eq!(ctx.diagnostics.len(), 2);
        assert_eq!(ctx.diagnostics[0].to_string(), "D1: something missing");
        assert_eq!(ctx.diagnostics[1].severity, Severity::Fail);
    }

    #[test]
    fn test_yes_no() {
        assert!(is_yes(Some(&json!("Yes"))));
        assert!(is_yes(Some(&json!(true))));
        assert!(!is_yes(Some(&json!("No"))));
        assert!(is_no(Some(&json!("Not available"))));
        assert!(!is_no(None));
    }
}
