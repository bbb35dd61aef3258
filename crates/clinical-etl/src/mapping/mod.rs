//! Mapping expressions and the function library they dispatch to.
//!
//! A mapping function receives the values of its parameters, grouped by
//! parameter and then by sheet, and returns a JSON value. `Value::Null`
//! means "no value"; the evaluator omits such fields from the output.

pub mod dates;
mod expression;
mod functions;

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::index::IndexedData;

pub use dates::DateOrder;
pub use expression::{MappingExpression, ParamRef};

/// The values one parameter has on one sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    /// A single value, when a row of the current sheet is active.
    Scalar(Value),
    /// Every row value the subject has on the sheet.
    List(Vec<Value>),
}

impl Cell {
    /// Iterate the values, a scalar yielding itself.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        match self {
            Cell::Scalar(v) => std::slice::from_ref(v).iter(),
            Cell::List(vs) => vs.iter(),
        }
    }

    /// The values as a list, a scalar becoming a one-element list.
    pub fn to_list(&self) -> Vec<Value> {
        self.values().cloned().collect()
    }
}

/// parameter column → sheet → values.
pub type ValuesByParam = IndexMap<String, IndexMap<String, Cell>>;

/// Result of an index expression: which column of which sheet links the
/// rows of a one-to-many relation, and the per-row link values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDescriptor {
    pub field: String,
    pub sheet: String,
    pub values: Vec<Value>,
}

impl IndexDescriptor {
    /// Read a descriptor from a `{field, sheet, values}` object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let values = match obj.get("values")? {
            Value::Array(vs) => vs.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        };
        Some(Self {
            field: obj.get("field")?.as_str()?.to_string(),
            sheet: obj.get("sheet")?.as_str()?.to_string(),
            values,
        })
    }

    pub fn to_value(&self) -> Value {
        json!({"field": self.field, "sheet": self.sheet, "values": self.values})
    }
}

/// Domain failure raised by a mapping function.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct MappingError {
    pub message: String,
}

impl MappingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type MappingResult = std::result::Result<Value, MappingError>;

/// Read-only facts a mapping function may consult besides its parameters.
#[derive(Debug, Clone, Copy)]
pub struct MappingEnv<'a> {
    /// Subject being converted.
    pub subject: &'a str,
    /// Date order used for every ambiguous date.
    pub date_order: DateOrder,
    /// The subject's `{offset, period}` reference date, once computed.
    pub reference_date: Option<&'a Value>,
    pub data: &'a IndexedData,
}

/// A mapping function.
pub type MappingFn = Arc<dyn Fn(&ValuesByParam, &MappingEnv<'_>) -> MappingResult + Send + Sync>;

/// Name → function table. Custom functions are registered under
/// `module.function` next to the builtins.
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: IndexMap<String, MappingFn>,
}

impl FunctionRegistry {
    /// A registry holding only the builtin functions.
    pub fn new() -> Self {
        let mut registry = Self {
            functions: IndexMap::new(),
        };
        functions::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) a function.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&ValuesByParam, &MappingEnv<'_>) -> MappingResult + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<&MappingFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Module prefixes of all qualified registrations.
    pub fn modules(&self) -> IndexSet<&str> {
        self.functions
            .keys()
            .filter_map(|name| name.rsplit_once('.').map(|(module, _)| module))
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(|s| s.as_str())
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}
