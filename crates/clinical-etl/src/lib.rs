//! clinical-etl: turn flat clinical sheets into nested, validated records.
//!
//! Sheets are indexed by subject, a mapping template describes how each
//! field of the target schema is computed from sheet columns, and the
//! resulting record trees are checked against the schema and a set of
//! business rules.
//!
//! # Pipeline
//!
//! 1. [`input::Parser`] reads a directory of CSV/TSV sheets.
//! 2. [`IndexedData`] folds them into `sheet → subject → column → values`.
//! 3. [`template::MappingTemplate`] becomes a [`template::Scaffold`].
//! 4. [`transform::ScaffoldEvaluator`] walks the scaffold per subject.
//! 5. [`validation::ValidationEngine`] reports diagnostics and statistics.
//!
//! # Example
//!
//! ```no_run
//! use clinical_etl::{Converter, RunConfig};
//!
//! let run = RunConfig::load("manifest.yml").unwrap();
//! let converter = Converter::new();
//! let result = converter.convert("data/", &run).unwrap();
//! converter.write("data/", &result).unwrap();
//!
//! println!("Records: {}", result.output.records.len());
//! println!("Errors: {}", result.report.errors().len());
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod input;
pub mod mapping;
pub mod output;
pub mod schema;
pub mod template;
pub mod transform;
pub mod validation;

mod converter;

pub use crate::converter::{AbortedSubject, ConversionOutput, ConversionRun, Converter, WrittenFiles};
pub use config::{ConverterConfig, Manifest, RunConfig};
pub use error::{EtlError, Result};
pub use index::{CALCULATED_SHEET, IndexedData};
pub use input::{DataTable, SourceMetadata};
pub use mapping::{DateOrder, FunctionRegistry, MappingError, MappingExpression};
pub use schema::OpenApiSchema;
pub use validation::{Diagnostic, Profile, Severity, ValidationEngine, ValidationReport};
