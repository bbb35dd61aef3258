//! Files a run writes next to its input.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{EtlError, Result};
use crate::index::{CALCULATED_SHEET, IndexedData};
use crate::transform::SubjectSnapshot;
use crate::validation::{Statistics, ValidationReport};

/// Path prefix for a run's outputs: the directory itself, or a file
/// without its extension.
pub fn output_stem(input: &Path) -> PathBuf {
    if input.is_dir() {
        input.components().collect()
    } else {
        input.with_extension("")
    }
}

/// `<stem><suffix>`, e.g. `data/run` + `_map.json` → `data/run_map.json`.
pub fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write pretty-printed (or compact) JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T, minify: bool) -> Result<()> {
    let text = if minify {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    fs::write(path, text).map_err(|e| EtlError::io(path, e))
}

pub fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|e| EtlError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// Rendered diagnostics, as written to `_validation_results.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResults {
    pub validation_errors: Vec<String>,
    pub validation_warnings: Vec<String>,
}

impl From<&ValidationReport> for ValidationResults {
    fn from(report: &ValidationReport) -> Self {
        Self {
            validation_errors: report.errors(),
            validation_warnings: report.warnings(),
        }
    }
}

pub fn write_validation_results(stem: &Path, report: &ValidationReport) -> Result<PathBuf> {
    let path = with_suffix(stem, "_validation_results.json");
    write_json(&path, &ValidationResults::from(report), false)?;
    info!(path = %path.display(), "wrote validation results");
    Ok(path)
}

/// The indexed input with everything the run computed folded in: index
/// overrides replace their columns and produced fields appear on the
/// `CALCULATED` sheet.
pub fn indexed_dump(
    data: &IndexedData,
    snapshots: &IndexMap<String, SubjectSnapshot>,
) -> Result<Value> {
    let mut dump = serde_json::to_value(data)?;
    for (subject, snapshot) in snapshots {
        for (sheet, columns) in &snapshot.overrides {
            for (column, values) in columns {
                if let Some(rows) = dump
                    .pointer_mut(&pointer(&["data", sheet, subject]))
                    .and_then(Value::as_object_mut)
                {
                    rows.insert(column.clone(), Value::Array(values.clone()));
                }
            }
        }
        if snapshot.calculated.is_empty() {
            continue;
        }
        if let Some(data) = dump.get_mut("data").and_then(Value::as_object_mut) {
            let calculated = data
                .entry(CALCULATED_SHEET)
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(calculated) = calculated.as_object_mut() {
                calculated.insert(subject.clone(), serde_json::to_value(&snapshot.calculated)?);
            }
        }
        if let Some(columns) = dump.get_mut("columns").and_then(Value::as_object_mut) {
            for field in snapshot.calculated.keys() {
                let sheets = columns
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Some(sheets) = sheets.as_array_mut() {
                    if !sheets.iter().any(|s| s == CALCULATED_SHEET) {
                        sheets.push(Value::from(CALCULATED_SHEET));
                    }
                }
            }
        }
    }
    Ok(dump)
}

fn pointer(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| format!("/{}", s.replace('~', "~0").replace('/', "~1")))
        .collect()
}

pub fn write_indexed(stem: &Path, dump: &Value, minify: bool) -> Result<PathBuf> {
    let path = with_suffix(stem, "_indexed.json");
    write_json(&path, dump, minify)?;
    info!(path = %path.display(), "wrote indexed data");
    Ok(path)
}

/// Write `<stem>_completeness.csv` from the statistics in a `_map.json`.
pub fn write_completeness(map_path: &Path) -> Result<PathBuf> {
    let map = read_json(map_path)?;
    let statistics: Statistics = map
        .get("statistics")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .ok_or_else(|| {
            EtlError::EmptyData(format!("{} has no statistics", map_path.display()))
        })?;

    let name = map_path.to_string_lossy();
    let out = match name.strip_suffix("_map.json") {
        Some(stem) => PathBuf::from(format!("{stem}_completeness.csv")),
        None => map_path.with_extension("completeness.csv"),
    };
    let mut writer = csv::Writer::from_path(&out)?;
    for row in statistics.completeness_rows() {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| EtlError::io(&out, e))?;
    info!(path = %out.display(), "wrote completeness table");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{DataTable, SheetSet};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_stems() {
        let dir = TempDir::new().unwrap();
        assert_eq!(output_stem(dir.path()), dir.path().to_path_buf());
        assert_eq!(output_stem(Path::new("run/donors.csv")), PathBuf::from("run/donors"));
        assert_eq!(
            with_suffix(Path::new("run/donors"), "_map.json"),
            PathBuf::from("run/donors_map.json")
        );
    }

    #[test]
    fn test_indexed_dump_folds_in_snapshots() {
        let mut sheets = SheetSet::new();
        sheets.insert(
            "Donor".to_string(),
            DataTable::from_rows(&["submitter_donor_id", "sex"], &[&["D1", "Female"]]),
        );
        let data = IndexedData::build("submitter_donor_id", &sheets).unwrap();
        let mut snapshot = SubjectSnapshot::default();
        snapshot
            .overrides
            .entry("Donor".to_string())
            .or_default()
            .insert("submitter_donor_id".to_string(), vec![json!("D1")]);
        snapshot.calculated.insert("sex".to_string(), vec![json!("Female")]);
        let snapshots = IndexMap::from([("D1".to_string(), snapshot)]);

        let dump = indexed_dump(&data, &snapshots).unwrap();
        assert_eq!(dump["data"]["CALCULATED"]["D1"]["sex"], json!(["Female"]));
        assert_eq!(dump["columns"]["sex"], json!(["Donor", "CALCULATED"]));
        assert_eq!(dump["data"]["Donor"]["D1"]["submitter_donor_id"], json!(["D1"]));
    }

    #[test]
    fn test_completeness_csv() {
        let dir = TempDir::new().unwrap();
        let map_path = dir.path().join("run_map.json");
        let map = json!({
            "donors": [],
            "statistics": {
                "required_but_missing": {
                    "donors": {"gender": {"total": 4, "missing": 1}},
                    "treatments": {"treatment_type": {"total": 3, "missing": 2}}
                },
                "schemas_used": ["donors", "treatments"],
                "schemas_not_used": [],
                "cases_missing_data": ["D1"],
                "summary_cases": {"complete_cases": 3, "total_cases": 4}
            }
        });
        write_json(&map_path, &map, false).unwrap();

        let out = write_completeness(&map_path).unwrap();
        assert_eq!(out, dir.path().join("run_completeness.csv"));
        let text = fs::read_to_string(out).unwrap();
        assert_eq!(
            text,
            "Schema,Field,Total,Missing,Fraction_missing\n\
             donors,gender,4,1,0.25\n\
             treatments,treatment_type,3,2,0.67\n"
        );
    }

    #[test]
    fn test_completeness_needs_statistics() {
        let dir = TempDir::new().unwrap();
        let map_path = dir.path().join("run_map.json");
        write_json(&map_path, &json!({"donors": []}), true).unwrap();
        assert!(matches!(write_completeness(&map_path), Err(EtlError::EmptyData(_))));
    }
}
