//! Subject-keyed index over all input sheets.
//!
//! Every sheet is folded into `data[sheet][subject][column]`, where each
//! column holds one entry per physical row the subject has on that sheet.
//! Repeated rows therefore become parallel arrays, which is what lets the
//! evaluator express one-to-many relations without a join engine.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{EtlError, Result};
use crate::input::{DataTable, SheetSet};

/// Pseudo-sheet holding values computed during conversion.
pub const CALCULATED_SHEET: &str = "CALCULATED";

/// Column name → values, one per row of a subject on one sheet.
pub type SubjectRows = IndexMap<String, Vec<Option<String>>>;

/// The merged, read-only view of every input sheet.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedData {
    /// Column that carries the subject identifier on every sheet.
    pub identifier_field: String,
    /// Column name → sheets containing it, in sheet order.
    pub columns: IndexMap<String, Vec<String>>,
    /// Unique subject ids in first-seen order.
    pub individuals: Vec<String>,
    /// sheet → subject → column → values.
    pub data: IndexMap<String, IndexMap<String, SubjectRows>>,
}

impl IndexedData {
    /// Index every sheet on `identifier_field`.
    pub fn build(identifier_field: &str, sheets: &SheetSet) -> Result<Self> {
        let mut index = Self {
            identifier_field: identifier_field.to_string(),
            columns: IndexMap::new(),
            individuals: Vec::new(),
            data: IndexMap::new(),
        };
        let mut seen = IndexSet::new();

        for (sheet, table) in sheets {
            let (columns, subjects) = index_sheet(sheet, table, identifier_field)?;
            for column in columns {
                index.columns.entry(column).or_default().push(sheet.clone());
            }
            for subject in subjects.keys() {
                if seen.insert(subject.clone()) {
                    index.individuals.push(subject.clone());
                }
            }
            index.data.insert(sheet.clone(), subjects);
        }

        Ok(index)
    }

    /// Names of all indexed sheets.
    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|s| s.as_str())
    }

    /// All rows a subject has on a sheet.
    pub fn subject_rows(&self, sheet: &str, subject: &str) -> Option<&SubjectRows> {
        self.data.get(sheet).and_then(|s| s.get(subject))
    }

    /// True if the subject has at least one row on the sheet.
    pub fn has_subject(&self, sheet: &str, subject: &str) -> bool {
        self.subject_rows(sheet, subject).is_some()
    }

    /// One column of a subject's rows on a sheet.
    pub fn column(&self, sheet: &str, subject: &str, column: &str) -> Option<&[Option<String>]> {
        self.subject_rows(sheet, subject)
            .and_then(|rows| rows.get(column))
            .map(|v| v.as_slice())
    }

    /// Sheets that contain `column`, in sheet order.
    pub fn sheets_with(&self, column: &str) -> &[String] {
        self.columns.get(column).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// True if `sheet` has a column named `column`.
    pub fn has_column(&self, sheet: &str, column: &str) -> bool {
        self.sheets_with(column).iter().any(|s| s == sheet)
    }

    /// Non-identifier columns that appear on more than one sheet.
    pub fn shared_columns(&self) -> Vec<(&str, &[String])> {
        self.columns
            .iter()
            .filter(|(col, sheets)| **col != self.identifier_field && sheets.len() > 1)
            .map(|(col, sheets)| (col.as_str(), sheets.as_slice()))
            .collect()
    }
}

fn normalize(cell: &str) -> Option<String> {
    if DataTable::is_null_value(cell) {
        None
    } else {
        Some(cell.trim().to_string())
    }
}

/// Fold one sheet into subject → column → values.
fn index_sheet(
    sheet: &str,
    table: &DataTable,
    identifier_field: &str,
) -> Result<(Vec<String>, IndexMap<String, SubjectRows>)> {
    let id_col = table.column_index(identifier_field).ok_or_else(|| {
        EtlError::Config(format!(
            "sheet '{sheet}' has no identifier column '{identifier_field}'"
        ))
    })?;

    let mut seen_headers = IndexSet::new();
    for header in table.headers.iter().filter(|h| !h.is_empty()) {
        if !seen_headers.insert(header.as_str()) {
            return Err(EtlError::Config(format!(
                "sheet '{sheet}' has more than one column named '{header}'"
            )));
        }
    }

    // Short rows read as null in their missing cells
    let cells: Vec<Vec<Option<String>>> = table
        .rows
        .iter()
        .map(|row| {
            (0..table.column_count())
                .map(|c| row.get(c).and_then(|v| normalize(v)))
                .collect()
        })
        .collect();

    // Keep the identifier plus every column that has at least one value
    let kept: Vec<usize> = (0..table.column_count())
        .filter(|&c| {
            c == id_col
                || (!table.headers[c].is_empty() && cells.iter().any(|row| row[c].is_some()))
        })
        .collect();

    let mut unique: IndexSet<Vec<Option<String>>> = IndexSet::new();
    for row in cells {
        let projected: Vec<Option<String>> = kept.iter().map(|&c| row[c].clone()).collect();
        if projected.iter().all(|v| v.is_none()) {
            continue;
        }
        if row[id_col].is_none() {
            warn!(sheet, "dropping row without a {identifier_field} value");
            continue;
        }
        unique.insert(projected);
    }
    let mut rows: Vec<Vec<Option<String>>> = unique.into_iter().collect();

    let id_pos = kept
        .iter()
        .position(|&c| c == id_col)
        .unwrap_or_default();
    rows.sort_by(|a, b| a[id_pos].cmp(&b[id_pos]));

    let columns: Vec<String> = kept.iter().map(|&c| table.headers[c].clone()).collect();
    let mut subjects: IndexMap<String, SubjectRows> = IndexMap::new();
    for row in rows {
        let Some(subject) = row[id_pos].clone() else {
            continue;
        };
        let entry = subjects.entry(subject.clone()).or_insert_with(|| {
            columns
                .iter()
                .map(|c| (c.clone(), Vec::new()))
                .collect::<SubjectRows>()
        });
        if entry.values().next().is_some_and(|v| !v.is_empty()) {
            debug!(sheet, subject = %subject, "duplicate row");
        }
        for (column, value) in columns.iter().zip(row) {
            if let Some(values) = entry.get_mut(column) {
                values.push(value);
            }
        }
    }

    Ok((columns, subjects))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheets() -> SheetSet {
        let mut sheets = SheetSet::new();
        sheets.insert(
            "Donor".to_string(),
            DataTable::from_rows(
                &["submitter_donor_id", "sex", "notes"],
                &[&["D2", "Male", ""], &["D1", "Female", " "], &["D1", "Female", ""]],
            ),
        );
        sheets.insert(
            "Treatment".to_string(),
            DataTable::from_rows(
                &["submitter_donor_id", "submitter_treatment_id", "sex"],
                &[
                    &["D1", "T1", "nan"],
                    &["", "", ""],
                    &["D3", "T9", "Female"],
                    &["D1", " T2 ", "Female"],
                ],
            ),
        );
        sheets
    }

    #[test]
    fn test_rows_grouped_sorted_and_deduplicated() {
        let index = IndexedData::build("submitter_donor_id", &sheets()).unwrap();

        assert_eq!(index.individuals, vec!["D1", "D2", "D3"]);
        assert_eq!(
            index.column("Donor", "D1", "sex").unwrap(),
            &[Some("Female".to_string())]
        );
        assert_eq!(
            index.column("Treatment", "D1", "submitter_treatment_id").unwrap(),
            &[Some("T1".to_string()), Some("T2".to_string())]
        );
        assert_eq!(
            index.column("Treatment", "D1", "sex").unwrap(),
            &[None, Some("Female".to_string())]
        );
    }

    #[test]
    fn test_empty_columns_dropped_and_columns_indexed() {
        let index = IndexedData::build("submitter_donor_id", &sheets()).unwrap();

        assert!(!index.columns.contains_key("notes"));
        assert_eq!(index.sheets_with("sex"), &["Donor", "Treatment"]);
        assert!(index.has_column("Treatment", "submitter_treatment_id"));
        assert_eq!(index.shared_columns(), vec![("sex", &["Donor".to_string(), "Treatment".to_string()][..])]);
    }

    #[test]
    fn test_parallel_arrays_have_equal_length() {
        let index = IndexedData::build("submitter_donor_id", &sheets()).unwrap();
        for subjects in index.data.values() {
            for rows in subjects.values() {
                let lengths: IndexSet<usize> = rows.values().map(|v| v.len()).collect();
                assert_eq!(lengths.len(), 1);
            }
        }
    }

    #[test]
    fn test_missing_identifier_column_is_config_error() {
        let mut sheets = SheetSet::new();
        sheets.insert(
            "Donor".to_string(),
            DataTable::from_rows(&["donor", "sex"], &[&["D1", "Female"]]),
        );
        let err = IndexedData::build("submitter_donor_id", &sheets).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn test_duplicate_headers_are_rejected() {
        let mut sheets = SheetSet::new();
        sheets.insert(
            "Donor".to_string(),
            DataTable::from_rows(&["submitter_donor_id", "sex", "sex"], &[&["D1", "Female", "Male"]]),
        );
        let err = IndexedData::build("submitter_donor_id", &sheets).unwrap_err();
        match err {
            EtlError::Config(message) => assert!(message.contains("'sex'")),
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_short_rows_read_as_null() {
        let mut sheets = SheetSet::new();
        sheets.insert(
            "Donor".to_string(),
            DataTable::from_rows(
                &["submitter_donor_id", "sex", "vital_status"],
                &[&["D1", "Female", "Alive"], &["D2"], &["D3", "Male"]],
            ),
        );
        let index = IndexedData::build("submitter_donor_id", &sheets).unwrap();
        assert_eq!(index.individuals, vec!["D1", "D2", "D3"]);
        assert_eq!(index.column("Donor", "D2", "sex").unwrap(), &[None]);
        assert_eq!(index.column("Donor", "D3", "vital_status").unwrap(), &[None]);
    }

    #[test]
    fn test_many_duplicate_rows_collapse() {
        let rows: Vec<[String; 2]> = (0..5_000)
            .map(|i| [format!("D{}", i % 50), format!("T{}", i % 100)])
            .collect();
        let rows: Vec<Vec<&str>> = rows.iter().map(|r| vec![r[0].as_str(), r[1].as_str()]).collect();
        let rows: Vec<&[&str]> = rows.iter().map(Vec::as_slice).collect();
        let mut sheets = SheetSet::new();
        sheets.insert(
            "Treatment".to_string(),
            DataTable::from_rows(&["submitter_donor_id", "submitter_treatment_id"], &rows),
        );

        let index = IndexedData::build("submitter_donor_id", &sheets).unwrap();
        assert_eq!(index.individuals.len(), 50);
        let treatments = index.column("Treatment", "D0", "submitter_treatment_id").unwrap();
        assert_eq!(treatments, &[Some("T0".to_string()), Some("T50".to_string())]);
    }
}
