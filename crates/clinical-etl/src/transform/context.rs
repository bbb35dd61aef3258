//! Per-subject state of a conversion: the row stack and computed values.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::index::{CALCULATED_SHEET, IndexedData};

/// Which row of which sheet an indexed node is producing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    /// Sheet the row belongs to; unset until the first index fills it in.
    pub sheet: Option<String>,
    /// Linking column the row was selected on.
    pub field: Option<String>,
    pub row: usize,
}

impl Frame {
    pub fn new(sheet: impl Into<String>, field: impl Into<String>, row: usize) -> Self {
        Self {
            sheet: Some(sheet.into()),
            field: Some(field.into()),
            row,
        }
    }

    /// The frame a subject's conversion starts from.
    pub fn root() -> Self {
        Self {
            sheet: None,
            field: None,
            row: 0,
        }
    }
}

/// What a subject's conversion added on top of the input data.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubjectSnapshot {
    /// Field name → every non-null value produced for it.
    pub calculated: IndexMap<String, Vec<Value>>,
    /// sheet → column → link values written by index expressions.
    pub overrides: IndexMap<String, IndexMap<String, Vec<Value>>>,
}

/// Mutable state while one subject is converted.
///
/// The input data is never written to. Values produced by index expressions
/// shadow the input column for this subject only, and every object field
/// produced so far is readable through the `CALCULATED` sheet.
#[derive(Debug)]
pub struct ConversionContext<'a> {
    pub subject: &'a str,
    data: &'a IndexedData,
    stack: Vec<Frame>,
    snapshot: SubjectSnapshot,
    /// `{offset, period}` of the subject's reference date.
    pub reference_date: Option<Value>,
    /// Field path being evaluated, for error messages.
    pub path: Vec<String>,
    /// Leaves skipped because a parameter did not resolve.
    pub omissions: Vec<String>,
}

impl<'a> ConversionContext<'a> {
    pub fn new(subject: &'a str, data: &'a IndexedData) -> Self {
        Self {
            subject,
            data,
            stack: Vec::new(),
            snapshot: SubjectSnapshot::default(),
            reference_date: None,
            path: Vec::new(),
            omissions: Vec::new(),
        }
    }

    pub fn push(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.stack.pop()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.stack.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.stack.last_mut()
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub fn stack(&self) -> &[Frame] {
        &self.stack
    }

    /// True if the subject has rows (or computed values) on the sheet.
    pub fn has_rows_on(&self, sheet: &str) -> bool {
        if sheet == CALCULATED_SHEET {
            !self.snapshot.calculated.is_empty()
        } else {
            self.data.has_subject(sheet, self.subject)
        }
    }

    /// True if the subject has computed a value for `field`.
    pub fn has_calculated(&self, field: &str) -> bool {
        self.snapshot.calculated.contains_key(field)
    }

    /// A column of the subject's rows, with index overrides applied.
    pub fn column(&self, sheet: &str, column: &str) -> Option<Vec<Value>> {
        if sheet == CALCULATED_SHEET {
            return self.snapshot.calculated.get(column).cloned();
        }
        if let Some(values) = self
            .snapshot
            .overrides
            .get(sheet)
            .and_then(|columns| columns.get(column))
        {
            return Some(values.clone());
        }
        self.data.column(sheet, self.subject, column).map(|values| {
            values
                .iter()
                .map(|v| v.as_ref().map_or(Value::Null, |s| Value::String(s.clone())))
                .collect()
        })
    }

    /// Shadow a column for the rest of this subject.
    pub fn override_column(&mut self, sheet: &str, column: &str, values: Vec<Value>) {
        self.snapshot
            .overrides
            .entry(sheet.to_string())
            .or_default()
            .insert(column.to_string(), values);
    }

    /// Remember a produced field value.
    pub fn record_calculated(&mut self, field: &str, value: Value) {
        self.snapshot
            .calculated
            .entry(field.to_string())
            .or_default()
            .push(value);
    }

    pub fn calculated(&self, field: &str) -> &[Value] {
        self.snapshot
            .calculated
            .get(field)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn path_string(&self) -> String {
        self.path.join(".")
    }

    pub fn into_snapshot(self) -> SubjectSnapshot {
        self.snapshot
    }
}
