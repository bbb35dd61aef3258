//! Validation of converted record trees.
//!
//! Records are checked in two passes: structurally against the JSON Schema
//! compiled from the target OpenAPI component, then type by type against a
//! [`RuleTable`] of required fields and business rules.

mod diagnostics;
mod engine;
pub mod profiles;
mod rules;
mod statistics;
mod structural;

pub use diagnostics::{Diagnostic, Severity};
pub use engine::{ValidationEngine, ValidationReport};
pub use profiles::{DEFAULT_PROFILE, Profile};
pub use rules::{DatePoint, RuleContext, RuleHandler, RuleTable, ValidationRule, has, is_no, is_yes};
pub use statistics::{CompletenessRow, FieldCount, Statistics, SummaryCases};
pub use structural::structural_diagnostics;
