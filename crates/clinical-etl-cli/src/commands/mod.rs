//! CLI command implementations.
//!
//! Each command returns `Ok(true)` on success and `Ok(false)` when it ran
//! but the data did not pass.

pub mod completeness;
pub mod convert;
pub mod template;
pub mod validate;

use colored::Colorize;
use clinical_etl::ValidationReport;

pub type CommandResult = Result<bool, Box<dyn std::error::Error>>;

/// Past this many messages of one kind only a count is printed.
const MAX_LISTED: usize = 20;

/// Print a report's errors and warnings.
pub(crate) fn print_report(report: &ValidationReport, verbose: bool) {
    let errors = report.errors();
    let warnings = report.warnings();

    print_messages(&warnings, "warning", verbose, |m| m.yellow().to_string());
    print_messages(&errors, "error", verbose, |m| m.red().to_string());

    let summary = &report.statistics.summary_cases;
    println!(
        "{} of {} cases complete ({} errors, {} warnings)",
        summary.complete_cases.to_string().white().bold(),
        summary.total_cases.to_string().white().bold(),
        errors.len().to_string().red(),
        warnings.len().to_string().yellow()
    );
}

fn print_messages(messages: &[String], kind: &str, verbose: bool, paint: impl Fn(&str) -> String) {
    if messages.is_empty() {
        return;
    }
    if messages.len() > MAX_LISTED && !verbose {
        println!(
            "{}",
            paint(&format!(
                "{} validation {kind}s; see the validation results file for details",
                messages.len()
            ))
        );
        return;
    }
    for message in messages {
        println!("  {}", paint(message));
    }
}
