//! Mapping templates: `field.path,{function(params)}` lines.
//!
//! A template is read once per run. Its lines become a [`Scaffold`], the
//! schema-shaped tree the evaluator walks for every subject.

mod scaffold;
mod skeleton;

use std::fs;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use tracing::{info, warn};

use crate::error::{EtlError, Result};
use crate::index::IndexedData;
use crate::mapping::MappingExpression;

pub use scaffold::Scaffold;
pub use skeleton::generate_template;

/// One non-comment template line.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateLine {
    /// Field path segments, markers stripped.
    pub path: Vec<String>,
    /// Mapping text with `;`-separated parameters, if the line maps anything.
    pub mapping: Option<String>,
    /// The line was marked `*`.
    pub required: bool,
    /// The line was marked `+`.
    pub ontology: bool,
    /// The line as read.
    pub raw: String,
}

impl TemplateLine {
    /// Parse `path,mapping`. A `##` mapping is a placeholder and maps nothing.
    pub fn parse(raw: &str) -> Self {
        let (field, value) = match raw.split_once(',') {
            Some((field, value)) => (field, value.trim()),
            None => (raw, ""),
        };
        let mapping = if value.is_empty() || value.starts_with("##") {
            None
        } else {
            Some(value.replace(',', ";"))
        };
        let field = field.trim();
        Self {
            path: field
                .replace(['*', '+'], "")
                .split('.')
                .map(|s| s.trim().to_string())
                .collect(),
            mapping,
            required: field.contains('*'),
            ontology: field.contains('+'),
            raw: raw.to_string(),
        }
    }

    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}

/// A parsed mapping template.
#[derive(Debug, Clone, Default)]
pub struct MappingTemplate {
    pub lines: Vec<TemplateLine>,
}

impl MappingTemplate {
    /// Read a template file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| EtlError::io(path, e))?;
        Self::parse(&text)
    }

    /// Parse template text. Rows are CSV; `#` rows are comments and the
    /// non-empty cells of every other row are rejoined with commas.
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut lines = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.get(0).is_some_and(|c| c.trim_start().starts_with('#')) {
                continue;
            }
            let joined = record
                .iter()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join(",");
            if joined.is_empty() {
                continue;
            }
            let line = TemplateLine::parse(&joined);
            if line.required && line.mapping.is_none() {
                info!(field = %line.path_string(), "required field has no mapping");
            }
            lines.push(line);
        }
        Ok(Self { lines })
    }

    /// Build the scaffold tree.
    pub fn scaffold(&self) -> Result<Scaffold> {
        Scaffold::from_lines(&self.lines)?
            .ok_or_else(|| EtlError::Config("could not create a mapping scaffold: the template has no fields".to_string()))
    }

    /// Reject one index expression shared by sibling INDEX lines that index
    /// the same field. `indexed_on(NONE)` may be shared freely.
    pub fn check_duplicate_indexes(&self) -> Result<()> {
        let mut by_expression: IndexMap<String, Vec<&TemplateLine>> = IndexMap::new();
        for line in &self.lines {
            let Some(mapping) = &line.mapping else {
                continue;
            };
            if line.path.last().map(String::as_str) != Some("INDEX") {
                continue;
            }
            let key: String = mapping
                .trim()
                .trim_start_matches('{')
                .trim_end_matches('}')
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            by_expression.entry(key).or_default().push(line);
        }

        for (expression, lines) in by_expression {
            if lines.len() < 2 || expression == "indexed_on(NONE)" {
                continue;
            }
            let indexed: Vec<&str> = lines
                .iter()
                .map(|l| {
                    l.path
                        .len()
                        .checked_sub(2)
                        .map_or("", |i| l.path[i].as_str())
                })
                .collect();
            let unique: IndexSet<&str> = indexed.iter().copied().collect();
            if unique.len() < indexed.len() {
                let mut message = format!(
                    "Key {{{expression}}} can only be used to index one line. \
                     If one of these duplicates does not have an index, use {{indexed_on(NONE)}}:"
                );
                for line in &lines {
                    message.push_str(&format!("\n    {}", line.path_string()));
                }
                return Err(EtlError::template(expression, message));
            }
        }
        Ok(())
    }

    /// Every mapping expression in the template, in line order.
    pub fn expressions(&self) -> Result<Vec<MappingExpression>> {
        self.lines
            .iter()
            .filter_map(|line| line.mapping.as_ref().map(|m| (line, m)))
            .map(|(line, m)| {
                MappingExpression::parse(m).map_err(|message| EtlError::template(&line.raw, message))
            })
            .collect()
    }
}

/// Sheets an expression set refers to: explicit qualifiers, plus the sheet
/// each unqualified column resolves to.
pub fn referenced_sheets<'a>(
    expressions: impl IntoIterator<Item = &'a MappingExpression>,
    data: &IndexedData,
) -> IndexSet<String> {
    let mut sheets = IndexSet::new();
    for expression in expressions {
        for param in &expression.params {
            match &param.sheet {
                Some(sheet) => {
                    sheets.insert(sheet.clone());
                }
                None => {
                    if let Some(sheet) = data.sheets_with(&param.column).first() {
                        sheets.insert(sheet.clone());
                    }
                }
            }
        }
    }
    sheets
}

/// Compare the sheets a template uses against the input sheets.
///
/// Template-only sheets are reported; input sheets the template never uses
/// are a configuration error.
pub fn check_sheet_coverage(referenced: &IndexSet<String>, data: &IndexedData) -> Result<()> {
    let input: IndexSet<&str> = data.sheet_names().collect();

    let missing: Vec<&str> = referenced
        .iter()
        .map(String::as_str)
        .filter(|s| !input.contains(s))
        .collect();
    if !missing.is_empty() {
        warn!(
            sheets = %missing.join(", "),
            "sheets named in the mapping template were not found in the input"
        );
    }

    let unused: Vec<&str> = input
        .iter()
        .copied()
        .filter(|s| !referenced.contains(*s))
        .collect();
    if !unused.is_empty() {
        return Err(EtlError::Config(format!(
            "the following input sheets are not used by the mapping template: {}",
            unused.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{DataTable, SheetSet};

    const TEMPLATE: &str = "\
## Schema generated from schema.yml
## Items are comma separated: element, mapping method
DONOR.INDEX,{indexed_on(Donor.submitter_donor_id)}
DONOR.INDEX.submitter_donor_id*,{single_val(Donor.submitter_donor_id)}
DONOR.INDEX.sex,\"{single_val(Donor.sex)}\"
DONOR.INDEX.cause_of_death, ##Edit this line
DONOR.INDEX.primary_diagnoses.INDEX,{indexed_on(PrimaryDiagnosis.submitter_donor_id)}
DONOR.INDEX.primary_diagnoses.INDEX.submitter_primary_diagnosis_id,{single_val(submitter_primary_diagnosis_id)}
";

    #[test]
    fn test_parse_line_markers_and_placeholders() {
        let line = TemplateLine::parse("DONOR.INDEX.*+sex, {single_val(Donor.sex, Other.sex)}");
        assert_eq!(line.path, vec!["DONOR", "INDEX", "sex"]);
        assert!(line.required);
        assert!(line.ontology);
        assert_eq!(line.mapping.as_deref(), Some("{single_val(Donor.sex; Other.sex)}"));

        let line = TemplateLine::parse("DONOR.INDEX.sex, ##Edit this line");
        assert_eq!(line.mapping, None);
    }

    #[test]
    fn test_template_skips_comments() {
        let template = MappingTemplate::parse(TEMPLATE).unwrap();
        assert_eq!(template.lines.len(), 6);
        assert!(template.lines[1].required);
        assert_eq!(template.lines[2].mapping.as_deref(), Some("{single_val(Donor.sex)}"));
        assert_eq!(template.lines[3].mapping, None);
        assert_eq!(template.expressions().unwrap().len(), 5);
    }

    #[test]
    fn test_duplicate_index_is_fatal() {
        let text = "\
DONOR.INDEX,{indexed_on(Donor.submitter_donor_id)}
DONOR.INDEX.treatments.INDEX,{indexed_on(Treatment.submitter_donor_id)}
DONOR.INDEX.primary_diagnoses.INDEX.treatments.INDEX,{indexed_on(Treatment.submitter_donor_id)}
";
        let err = MappingTemplate::parse(text)
            .unwrap()
            .check_duplicate_indexes()
            .unwrap_err();
        assert!(err.to_string().contains("can only be used to index one line"));
    }

    #[test]
    fn test_shared_index_on_different_fields_or_none_is_allowed() {
        let text = "\
DONOR.INDEX.comorbidities.INDEX,{indexed_on(NONE)}
DONOR.INDEX.exposures.INDEX,{indexed_on(NONE)}
DONOR.INDEX.primary_diagnoses.INDEX.comorbidities.INDEX,{indexed_on(NONE)}
DONOR.INDEX.followups.INDEX,{indexed_on(FollowUp.submitter_donor_id)}
DONOR.INDEX.treatments.INDEX.followups.INDEX,{indexed_on(FollowUp.submitter_treatment_id)}
";
        let template = MappingTemplate::parse(text).unwrap();
        assert!(template.check_duplicate_indexes().is_ok());
    }

    #[test]
    fn test_sheet_coverage() {
        let mut sheets = SheetSet::new();
        sheets.insert(
            "Donor".to_string(),
            DataTable::from_rows(&["submitter_donor_id", "sex"], &[&["D1", "Female"]]),
        );
        sheets.insert(
            "PrimaryDiagnosis".to_string(),
            DataTable::from_rows(
                &["submitter_donor_id", "submitter_primary_diagnosis_id"],
                &[&["D1", "P1"]],
            ),
        );
        let data = IndexedData::build("submitter_donor_id", &sheets).unwrap();
        let template = MappingTemplate::parse(TEMPLATE).unwrap();
        let expressions = template.expressions().unwrap();

        let referenced = referenced_sheets(&expressions, &data);
        assert!(referenced.contains("PrimaryDiagnosis"));
        assert!(check_sheet_coverage(&referenced, &data).is_ok());

        let mut extra = sheets.clone();
        extra.insert(
            "Unused".to_string(),
            DataTable::from_rows(&["submitter_donor_id"], &[&["D1"]]),
        );
        let data = IndexedData::build("submitter_donor_id", &extra).unwrap();
        let err = check_sheet_coverage(&referenced_sheets(&expressions, &data), &data).unwrap_err();
        assert!(err.to_string().contains("Unused"));
    }
}
