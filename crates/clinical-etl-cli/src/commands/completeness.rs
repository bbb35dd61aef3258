//! Completeness command - tabulate missing required fields.

use std::path::PathBuf;

use colored::Colorize;
use clinical_etl::output;

use super::CommandResult;

pub fn run(input: PathBuf) -> CommandResult {
    if !input.exists() {
        return Err(format!("File not found: {}", input.display()).into());
    }

    let written = output::write_completeness(&input)?;
    println!(
        "{} {}",
        "Saved to".green().bold(),
        written.display().to_string().white()
    );
    Ok(true)
}
