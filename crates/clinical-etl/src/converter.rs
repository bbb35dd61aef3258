//! Main conversion entry point.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::{ConverterConfig, RunConfig};
use crate::error::{EtlError, Result};
use crate::index::IndexedData;
use crate::input::{Parser, SourceMetadata};
use crate::mapping::FunctionRegistry;
use crate::output;
use crate::schema::OpenApiSchema;
use crate::template::{MappingTemplate, check_sheet_coverage, referenced_sheets};
use crate::transform::{ScaffoldEvaluator, SubjectOutcome, SubjectSnapshot};
use crate::validation::{Statistics, ValidationEngine, ValidationReport};

/// A subject whose conversion was abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortedSubject {
    pub subject: String,
    pub reason: String,
}

/// Per-subject results gathered over a run.
#[derive(Debug, Default)]
struct SubjectBatch {
    records: Vec<Value>,
    omissions: Vec<String>,
    aborted: Vec<AbortedSubject>,
    snapshots: IndexMap<String, SubjectSnapshot>,
}

impl SubjectBatch {
    /// Take one subject's outcome. A stack imbalance only drops that
    /// subject; any other error is handed back.
    fn add(&mut self, subject: &str, outcome: Result<SubjectOutcome>) -> Result<()> {
        match outcome {
            Ok(outcome) => {
                self.records.extend(outcome.records);
                self.omissions.extend(outcome.omissions);
                self.snapshots.insert(subject.to_string(), outcome.snapshot);
                Ok(())
            }
            Err(e @ EtlError::StackImbalance { .. }) => {
                warn!(subject, "{e}");
                self.aborted.push(AbortedSubject {
                    subject: subject.to_string(),
                    reason: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// The `_map.json` document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutput {
    pub openapi_url: String,
    pub schema_class: String,
    /// Key the records are written under, e.g. `donors`.
    pub root_key: String,
    pub records: Vec<Value>,
    pub commit_sha: Option<String>,
    pub statistics: Option<Statistics>,
    pub aborted_subjects: Vec<AbortedSubject>,
}

impl ConversionOutput {
    pub fn to_value(&self) -> Result<Value> {
        let mut map = Map::new();
        map.insert("openapi_url".to_string(), Value::from(self.openapi_url.clone()));
        map.insert("schema_class".to_string(), Value::from(self.schema_class.clone()));
        map.insert(self.root_key.clone(), Value::Array(self.records.clone()));
        if let Some(sha) = &self.commit_sha {
            map.insert("katsu_sha".to_string(), Value::from(sha.clone()));
        }
        if let Some(statistics) = &self.statistics {
            map.insert("statistics".to_string(), serde_json::to_value(statistics)?);
        }
        if !self.aborted_subjects.is_empty() {
            map.insert(
                "aborted_subjects".to_string(),
                serde_json::to_value(&self.aborted_subjects)?,
            );
        }
        Ok(Value::Object(map))
    }
}

/// Everything a conversion produced.
#[derive(Debug, Clone)]
pub struct ConversionRun {
    pub output: ConversionOutput,
    pub report: ValidationReport,
    /// Template fields skipped because their parameters were not in the input.
    pub omissions: Vec<String>,
    pub sources: Vec<SourceMetadata>,
    /// Indexed data with computed values, when requested.
    pub indexed: Option<Value>,
}

impl ConversionRun {
    /// True if nothing failed validation and no subject was aborted.
    pub fn succeeded(&self) -> bool {
        self.report.is_valid() && self.output.aborted_subjects.is_empty()
    }
}

/// Paths a run wrote.
#[derive(Debug, Clone)]
pub struct WrittenFiles {
    pub map: PathBuf,
    pub validation_results: PathBuf,
    pub indexed: Option<PathBuf>,
}

/// Converts sheets into validated record trees.
pub struct Converter {
    config: ConverterConfig,
    registry: FunctionRegistry,
}

impl Converter {
    pub fn new() -> Self {
        Self::with_config(ConverterConfig::default())
    }

    pub fn with_config(config: ConverterConfig) -> Self {
        Self {
            config,
            registry: FunctionRegistry::new(),
        }
    }

    /// Replace the function table, e.g. to add custom modules.
    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    /// Convert the sheets at `input` as `run` describes.
    ///
    /// Subjects whose row stack ends unbalanced are recorded and skipped. A
    /// mapping function failure stops the run; the indexed data as it stood
    /// is written next to the input first.
    pub fn convert(&self, input: impl AsRef<Path>, run: &RunConfig) -> Result<ConversionRun> {
        let input = input.as_ref();
        info!(input = %input.display(), "starting conversion");
        run.check_functions(&self.registry)?;

        let schema = OpenApiSchema::load(&run.schema, &run.profile.component)?;
        let validator = schema.validator()?;

        let template = MappingTemplate::from_path(&run.mapping)?;
        template.check_duplicate_indexes()?;
        let scaffold = template.scaffold()?;

        let parser = Parser::with_config(self.config.parser.clone());
        let (sheets, sources) = parser.read_sheets(input)?;
        for source in &sources {
            debug!(sheet = %source.sheet, sha256 = %source.hash, rows = source.row_count, "input sheet");
        }
        let data = IndexedData::build(&run.identifier, &sheets)?;
        for (column, sheets) in data.shared_columns() {
            debug!(column, sheets = %sheets.join(", "), "column present in multiple sheets");
        }

        let referenced = referenced_sheets(
            scaffold.expressions().into_iter().chain(run.reference_date.as_ref()),
            &data,
        );
        check_sheet_coverage(&referenced, &data)?;

        let mut evaluator = ScaffoldEvaluator::new(&scaffold, &self.registry, &data)?
            .with_date_order(run.date_order);
        if let Some(reference_date) = &run.reference_date {
            evaluator = evaluator.with_reference_date(reference_date.clone())?;
        }

        info!(subjects = data.individuals.len(), "creating records");
        let mut batch = SubjectBatch::default();
        for subject in &data.individuals {
            if let Err(e) = batch.add(subject, evaluator.convert_subject(subject)) {
                if matches!(e, EtlError::Mapping { .. }) {
                    error!("{e}");
                    let dump = output::indexed_dump(&data, &batch.snapshots)?;
                    output::write_indexed(&output::output_stem(input), &dump, self.config.minify)?;
                }
                return Err(e);
            }
        }
        let SubjectBatch {
            records,
            omissions,
            aborted,
            snapshots,
        } = batch;

        info!(records = records.len(), "validating records");
        let report = ValidationEngine::new(run.profile.rules.clone())
            .with_schema(validator)
            .with_date_order(run.date_order)
            .validate(&records);

        let indexed = if self.config.write_index {
            Some(output::indexed_dump(&data, &snapshots)?)
        } else {
            None
        };

        Ok(ConversionRun {
            output: ConversionOutput {
                openapi_url: schema.source.clone(),
                schema_class: run.profile.name.clone(),
                root_key: run.profile.root_key().to_string(),
                records,
                commit_sha: schema.commit_sha.clone(),
                statistics: Some(report.statistics.clone()),
                aborted_subjects: aborted,
            },
            report,
            omissions,
            sources,
            indexed,
        })
    }

    /// Write a run's `_map.json`, `_validation_results.json` and, if it
    /// carries one, `_indexed.json`.
    pub fn write(&self, input: impl AsRef<Path>, run: &ConversionRun) -> Result<WrittenFiles> {
        let stem = output::output_stem(input.as_ref());
        let map = output::with_suffix(&stem, "_map.json");
        output::write_json(&map, &run.output.to_value()?, self.config.minify)?;
        info!(path = %map.display(), "wrote records");
        let validation_results = output::write_validation_results(&stem, &run.report)?;
        let indexed = run
            .indexed
            .as_ref()
            .map(|dump| output::write_indexed(&stem, dump, self.config.minify))
            .transpose()?;
        Ok(WrittenFiles {
            map,
            validation_results,
            indexed,
        })
    }

    /// Validate the records of an existing `_map.json` again.
    pub fn revalidate(&self, map_path: impl AsRef<Path>, run: &RunConfig) -> Result<ValidationReport> {
        let map_path = map_path.as_ref();
        let map = output::read_json(map_path)?;
        let root_key = run.profile.root_key();
        let records = map
            .get(root_key)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                EtlError::EmptyData(format!("{} has no '{root_key}' records", map_path.display()))
            })?;

        let schema = OpenApiSchema::load(&run.schema, &run.profile.component)?;
        Ok(ValidationEngine::new(run.profile.rules.clone())
            .with_schema(schema.validator()?)
            .with_date_order(run.date_order)
            .validate(records))
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}
