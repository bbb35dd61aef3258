//! Input sheets: reading delimited files into tables.

mod parser;
mod source;

pub use parser::{Parser, ParserConfig};
pub use source::{DataTable, SheetSet, SourceMetadata};
