//! Run configuration read from a YAML manifest.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EtlError, Result};
use crate::input::ParserConfig;
use crate::mapping::{DateOrder, FunctionRegistry, MappingExpression};
use crate::validation::{DEFAULT_PROFILE, Profile};

/// The manifest as written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Column holding the subject identifier on every sheet.
    pub identifier: Option<String>,
    /// OpenAPI document: a URL, or a path relative to the manifest.
    pub schema: Option<String>,
    /// Validation profile name.
    pub schema_class: Option<String>,
    /// Mapping template path, relative to the manifest.
    pub mapping: Option<String>,
    /// Permutation of `DMY`.
    pub date_format: Option<String>,
    /// Expression computing each subject's reference date.
    pub reference_date: Option<String>,
    /// Custom function modules the template may call.
    #[serde(default)]
    pub functions: Vec<String>,
}

impl Manifest {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| EtlError::io(path, e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Options that tune a conversion but do not come from the manifest.
#[derive(Debug, Clone, Default)]
pub struct ConverterConfig {
    pub parser: ParserConfig,
    /// Also write the indexed data with this run's computed values.
    pub write_index: bool,
    /// Write compact JSON.
    pub minify: bool,
}

/// A checked manifest with paths resolved.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub identifier: String,
    /// URL or resolved path of the OpenAPI document.
    pub schema: String,
    pub profile: Profile,
    pub mapping: PathBuf,
    pub date_order: DateOrder,
    pub reference_date: Option<MappingExpression>,
    pub functions: Vec<String>,
}

impl RunConfig {
    /// Read and check a manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let manifest = Manifest::from_path(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_manifest(manifest, base)
    }

    /// Check a manifest; relative paths are resolved against `base`.
    pub fn from_manifest(manifest: Manifest, base: &Path) -> Result<Self> {
        let identifier = match manifest.identifier.as_deref().map(str::trim) {
            None => {
                return Err(EtlError::Config(
                    "need to specify what the main identifier column name is as 'identifier' in the manifest".to_string(),
                ));
            }
            Some("") => {
                return Err(EtlError::Config(
                    "'identifier' in the manifest cannot be blank".to_string(),
                ));
            }
            Some(identifier) => identifier.to_string(),
        };

        let date_order = manifest
            .date_format
            .as_deref()
            .ok_or_else(|| {
                EtlError::Config("'date_format' must be specified in the manifest".to_string())
            })?
            .parse::<DateOrder>()
            .map_err(EtlError::Config)?;

        let schema = manifest.schema.ok_or_else(|| {
            EtlError::Config("need to specify an OpenAPI schema as 'schema' in the manifest".to_string())
        })?;
        let schema = if is_url(&schema) {
            schema
        } else {
            base.join(&schema).to_string_lossy().into_owned()
        };

        let class = manifest.schema_class.as_deref().unwrap_or(DEFAULT_PROFILE);
        let profile = Profile::by_name(class).ok_or_else(|| {
            EtlError::Config(format!(
                "unknown schema_class '{class}'; expected one of {}",
                Profile::names().join(", ")
            ))
        })?;

        let mapping = manifest
            .mapping
            .map(|m| base.join(m))
            .ok_or_else(|| {
                EtlError::Config("need to specify a mapping template as 'mapping' in the manifest".to_string())
            })?;

        let reference_date = manifest
            .reference_date
            .as_deref()
            .map(|text| {
                MappingExpression::parse(text)
                    .map_err(|message| EtlError::template(format!("reference_date: {text}"), message))
            })
            .transpose()?;

        debug!(%identifier, %schema, profile = %profile.name, %date_order, "loaded manifest");
        Ok(Self {
            identifier,
            schema,
            profile,
            mapping,
            date_order,
            reference_date,
            functions: manifest.functions,
        })
    }

    /// Every custom module named in the manifest must have registrations.
    pub fn check_functions(&self, registry: &FunctionRegistry) -> Result<()> {
        let modules = registry.modules();
        for module in &self.functions {
            if !modules.contains(module.as_str()) {
                return Err(EtlError::Config(format!(
                    "could not find mapping functions for module '{module}'; register them as '{module}.<function>'"
                )));
            }
        }
        Ok(())
    }
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
