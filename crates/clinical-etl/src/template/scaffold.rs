//! Building the scaffold tree from template line paths.
//!
//! Lines sharing a path prefix become one object. An `INDEX` segment turns
//! its group into a one-to-many relation whose first line is the index
//! expression.

use indexmap::IndexMap;
use tracing::warn;

use super::TemplateLine;
use crate::error::{EtlError, Result};
use crate::mapping::MappingExpression;

/// Schema-shaped tree of mapping expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Scaffold {
    /// A field mapped by an expression, or left unmapped.
    Leaf(Option<MappingExpression>),
    /// Named children in template order.
    Object(IndexMap<String, Scaffold>),
    /// A one-to-many relation: `index` decides how many copies of `nodes`
    /// are produced.
    Indexed {
        index: MappingExpression,
        nodes: Box<Scaffold>,
    },
}

/// A line relative to the scaffold level being built.
struct Entry<'a> {
    rest: &'a [String],
    mapping: Option<&'a str>,
    line: &'a TemplateLine,
}

impl Scaffold {
    /// Build the tree from template lines. `None` if there are no fields.
    pub fn from_lines(lines: &[TemplateLine]) -> Result<Option<Self>> {
        let entries = lines
            .iter()
            .filter(|l| l.path.iter().any(|s| !s.is_empty()))
            .map(|line| Entry {
                rest: &line.path,
                mapping: line.mapping.as_deref(),
                line,
            })
            .collect();
        build(entries)
    }

    /// Every expression in the tree, depth first.
    pub fn expressions(&self) -> Vec<&MappingExpression> {
        let mut out = Vec::new();
        self.collect_expressions(&mut out);
        out
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a MappingExpression>) {
        match self {
            Scaffold::Leaf(Some(expr)) => out.push(expr),
            Scaffold::Leaf(None) => {}
            Scaffold::Object(children) => {
                for child in children.values() {
                    child.collect_expressions(out);
                }
            }
            Scaffold::Indexed { index, nodes } => {
                out.push(index);
                nodes.collect_expressions(out);
            }
        }
    }
}

fn parse_expression(mapping: &str, line: &TemplateLine) -> Result<MappingExpression> {
    MappingExpression::parse(mapping).map_err(|message| EtlError::template(&line.raw, message))
}

fn build(entries: Vec<Entry<'_>>) -> Result<Option<Scaffold>> {
    let mut groups: IndexMap<&str, Vec<Entry<'_>>> = IndexMap::new();
    for entry in entries {
        let Some((head, rest)) = entry.rest.split_first() else {
            continue;
        };
        groups.entry(head.as_str()).or_default().push(Entry { rest, ..entry });
    }
    if groups.is_empty() {
        return Ok(None);
    }

    if let Some(index_entries) = groups.shift_remove("INDEX") {
        if let Some((key, entries)) = groups.first() {
            return Err(EtlError::template(
                &entries[0].line.raw,
                format!("'{key}' cannot be a sibling of an INDEX"),
            ));
        }
        return build_indexed(index_entries).map(Some);
    }

    let mut children = IndexMap::new();
    for (key, entries) in groups {
        children.insert(key.to_string(), build_field(key, entries)?);
    }
    Ok(Some(Scaffold::Object(children)))
}

fn build_indexed(entries: Vec<Entry<'_>>) -> Result<Scaffold> {
    let mut entries = entries.into_iter();
    let first = entries.next();
    let (mapping, line) = match &first {
        Some(Entry {
            rest: [],
            mapping: Some(mapping),
            line,
        }) => (*mapping, *line),
        Some(entry) => {
            return Err(EtlError::template(
                &entry.line.raw,
                "an INDEX needs an index expression such as {indexed_on(Sheet.id)} before its fields",
            ));
        }
        None => return Err(EtlError::Config("empty INDEX group".to_string())),
    };
    let index = parse_expression(mapping, line)?;

    let nested: Vec<Entry<'_>> = entries
        .filter(|e| {
            if e.rest.is_empty() {
                warn!(line = %e.line.raw, "ignoring repeated index expression");
                false
            } else {
                true
            }
        })
        .collect();
    let nodes = build(nested)?.unwrap_or_else(|| Scaffold::Object(IndexMap::new()));
    Ok(Scaffold::Indexed {
        index,
        nodes: Box::new(nodes),
    })
}

fn build_field(key: &str, entries: Vec<Entry<'_>>) -> Result<Scaffold> {
    let (own, nested): (Vec<Entry<'_>>, Vec<Entry<'_>>) =
        entries.into_iter().partition(|e| e.rest.is_empty());

    if let Some(entry) = own.iter().find(|e| e.mapping.is_some()) {
        if !nested.is_empty() {
            warn!(field = key, "field has its own mapping; ignoring its nested lines");
        }
        let mapping = entry.mapping.unwrap_or_default();
        return Ok(Scaffold::Leaf(Some(parse_expression(mapping, entry.line)?)));
    }

    Ok(build(nested)?.unwrap_or(Scaffold::Leaf(None)))
}
