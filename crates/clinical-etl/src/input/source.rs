//! Sheet tables and their provenance metadata.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Cell contents treated as missing when a sheet is read.
const NULL_TOKENS: &[&str] = &[
    "", "nan", "NaN", "NAN", "-nan", "-NaN", "NA", "N/A", "n/a", "#N/A", "#NA", "<NA>", "null",
    "NULL", "None",
];

/// Metadata about one input sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Sheet name (file stem).
    pub sheet: String,
    /// File name without path.
    pub file: String,
    /// Full path to the file.
    pub path: PathBuf,
    /// SHA-256 hash of the file contents.
    pub hash: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Detected format (csv, tsv, etc.).
    pub format: String,
    /// Number of data rows (excluding header).
    pub row_count: usize,
    /// Number of columns.
    pub column_count: usize,
    /// When the file was read.
    pub read_at: DateTime<Utc>,
}

impl SourceMetadata {
    /// Create metadata for a sheet that has been read.
    pub fn new(
        path: PathBuf,
        hash: String,
        size_bytes: u64,
        format: String,
        row_count: usize,
        column_count: usize,
    ) -> Self {
        let file = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sheet = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            sheet,
            file,
            path,
            hash,
            size_bytes,
            format,
            row_count,
            column_count,
            read_at: Utc::now(),
        }
    }
}

/// One parsed sheet.
#[derive(Debug, Clone)]
pub struct DataTable {
    /// Column headers.
    pub headers: Vec<String>,
    /// Row data as strings (row-major order).
    pub rows: Vec<Vec<String>>,
    /// The delimiter used.
    pub delimiter: u8,
}

impl DataTable {
    /// Create a new data table.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>, delimiter: u8) -> Self {
        Self {
            headers,
            rows,
            delimiter,
        }
    }

    /// Build a comma-delimited table from string slices. Mostly useful in tests.
    pub fn from_rows(headers: &[&str], rows: &[&[&str]]) -> Self {
        Self::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
            b',',
        )
    }

    /// Get the number of columns.
    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Get the number of rows (excluding header).
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    /// Get a specific cell value.
    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row).and_then(|r| r.get(col).map(|s| s.as_str()))
    }

    /// Check if a value represents a missing/null value.
    pub fn is_null_value(value: &str) -> bool {
        NULL_TOKENS.contains(&value.trim())
    }
}

/// Sheets keyed by name, in the order they were read.
pub type SheetSet = IndexMap<String, DataTable>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_null_value() {
        assert!(DataTable::is_null_value(""));
        assert!(DataTable::is_null_value("  "));
        assert!(DataTable::is_null_value("nan"));
        assert!(DataTable::is_null_value("NA"));
        assert!(DataTable::is_null_value("N/A"));
        assert!(DataTable::is_null_value("None"));
        assert!(!DataTable::is_null_value("No"));
        assert!(!DataTable::is_null_value("0"));
        assert!(!DataTable::is_null_value("Not available"));
    }

    #[test]
    fn test_metadata_sheet_name_is_file_stem() {
        let meta = SourceMetadata::new(
            PathBuf::from("/data/raw/Donor.csv"),
            "sha256:00".to_string(),
            10,
            "csv".to_string(),
            1,
            2,
        );
        assert_eq!(meta.sheet, "Donor");
        assert_eq!(meta.file, "Donor.csv");
    }

    #[test]
    fn test_column_index_ignores_padding() {
        let table = DataTable::from_rows(&["id ", "value"], &[&["a", "1"]]);
        assert_eq!(table.column_index("id"), Some(0));
        assert_eq!(table.column_index("missing"), None);
    }
}
