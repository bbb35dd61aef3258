//! Conversion of indexed sheets into nested records.
//!
//! The [`ScaffoldEvaluator`] walks the template scaffold once per subject.
//! Each indexed node selects the rows linked to the row above it, so the
//! sheet hierarchy is rebuilt without joins.

mod context;
mod engine;

pub use context::{ConversionContext, Frame, SubjectSnapshot};
pub use engine::{REFERENCE_DATE, ScaffoldEvaluator, SubjectOutcome};
