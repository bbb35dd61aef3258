//! Diagnostics produced while validating records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Recoverable incompleteness; the data can still be ingested.
    Warn,
    /// Contradictory or structurally invalid data.
    Fail,
}

/// One validation finding, located by the ids of the records above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Breadcrumb from the root record down.
    pub location: Vec<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, location: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            location,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.iter().all(|l| l.trim().is_empty()) {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.location.join(" > "), self.message)
        }
    }
}
