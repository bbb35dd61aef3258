//! Parsing of `{function(param;param)}` mapping expressions.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static FUNCTION_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\s*([A-Za-z_][\w.]*)\s*\((.*)\)\s*\}$").unwrap());

/// A `[sheet.]column` reference inside a mapping expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamRef {
    /// Explicit sheet qualifier, if any.
    pub sheet: Option<String>,
    /// Column name.
    pub column: String,
}

impl ParamRef {
    /// Parse `sheet.column`, `"sheet.with.dots".column`,
    /// `"sheet"."column.with.dots"` or a bare column.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        if let Some(quote) = s.chars().next().filter(|c| *c == '"' || *c == '\'') {
            if let Some(end) = s[1..].find(quote) {
                let sheet = &s[1..1 + end];
                if let Some(column) = s[2 + end..].strip_prefix('.') {
                    return Self {
                        sheet: Some(sheet.to_string()),
                        column: unquote(column),
                    };
                }
            }
        }
        match s.split_once('.') {
            Some((sheet, column)) => Self {
                sheet: Some(unquote(sheet)),
                column: unquote(column),
            },
            None => Self {
                sheet: None,
                column: unquote(s),
            },
        }
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sheet {
            Some(sheet) => write!(f, "{sheet}.{}", self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

fn unquote(s: &str) -> String {
    s.trim().replace(['"', '\''], "")
}

/// A parsed mapping expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingExpression {
    /// Function name, possibly module-qualified (`module.function`).
    pub function: String,
    /// Parameters in declaration order.
    pub params: Vec<ParamRef>,
    /// Source text, braces included.
    pub text: String,
}

impl MappingExpression {
    /// Parse `{function(p1;p2)}`. Braces are optional and commas are
    /// accepted as parameter separators.
    pub fn parse(text: &str) -> Result<Self, String> {
        let trimmed = text.trim();
        let wrapped = if trimmed.starts_with('{') {
            trimmed.replace(',', ";")
        } else {
            format!("{{{}}}", trimmed.replace(',', ";"))
        };
        let caps = FUNCTION_CALL
            .captures(&wrapped)
            .ok_or_else(|| format!("'{trimmed}' is not of the form {{function(parameters)}}"))?;

        let params = caps[2]
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(ParamRef::parse)
            .collect();

        Ok(Self {
            function: caps[1].to_string(),
            params,
            text: wrapped,
        })
    }
}

impl fmt::Display for MappingExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
