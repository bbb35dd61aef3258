//! Convert command - turn sheets into validated records.

use std::path::PathBuf;

use colored::Colorize;
use clinical_etl::{Converter, ConverterConfig, RunConfig};

use super::{CommandResult, print_report};

pub fn run(
    input: PathBuf,
    manifest: PathBuf,
    index: bool,
    minify: bool,
    verbose: bool,
) -> CommandResult {
    if !input.exists() {
        return Err(format!("Input not found: {}", input.display()).into());
    }

    let run_config = RunConfig::load(&manifest)?;
    println!(
        "{} {} as {}",
        "Converting".cyan().bold(),
        input.display().to_string().white(),
        run_config.profile.name.white().bold()
    );

    let converter = Converter::with_config(ConverterConfig {
        write_index: index,
        minify,
        ..Default::default()
    });
    let run = converter.convert(&input, &run_config)?;

    if verbose {
        println!();
        println!("{}", "Sources:".yellow().bold());
        for source in &run.sources {
            println!(
                "  {:24} {:>8} rows  {}",
                source.sheet,
                source.row_count,
                source.hash.get(..12).unwrap_or(&source.hash)
            );
        }
        if !run.omissions.is_empty() {
            println!("{}", "Omitted fields:".yellow().bold());
            for field in &run.omissions {
                println!("  {field}");
            }
        }
        println!();
    }

    println!(
        "Created {} records",
        run.output.records.len().to_string().white().bold()
    );
    for aborted in &run.output.aborted_subjects {
        println!(
            "  {} {}: {}",
            "Aborted".red().bold(),
            aborted.subject,
            aborted.reason
        );
    }

    print_report(&run.report, verbose);

    let written = converter.write(&input, &run)?;
    println!();
    println!(
        "{} {}",
        "Saved to".green().bold(),
        written.map.display().to_string().white()
    );
    println!(
        "{} {}",
        "Validation results".green().bold(),
        written.validation_results.display().to_string().white()
    );
    if let Some(indexed) = &written.indexed {
        println!(
            "{} {}",
            "Indexed data".green().bold(),
            indexed.display().to_string().white()
        );
    }

    if run.succeeded() {
        println!("{}", "All records passed validation".green());
    }
    Ok(run.succeeded())
}
