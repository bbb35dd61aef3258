//! Validate command - check an existing _map.json again.

use std::path::PathBuf;

use colored::Colorize;
use clinical_etl::{Converter, RunConfig, output};

use super::{CommandResult, print_report};

pub fn run(input: PathBuf, manifest: PathBuf, verbose: bool) -> CommandResult {
    if !input.exists() {
        return Err(format!("File not found: {}", input.display()).into());
    }

    let run_config = RunConfig::load(&manifest)?;
    println!(
        "{} {}",
        "Validating".cyan().bold(),
        input.display().to_string().white()
    );

    let report = Converter::new().revalidate(&input, &run_config)?;
    print_report(&report, verbose);

    let name = input.to_string_lossy();
    let stem = PathBuf::from(name.strip_suffix("_map.json").unwrap_or(&name[..]).to_string());
    let written = output::write_validation_results(&stem, &report)?;
    println!(
        "{} {}",
        "Saved to".green().bold(),
        written.display().to_string().white()
    );

    Ok(report.is_valid())
}
