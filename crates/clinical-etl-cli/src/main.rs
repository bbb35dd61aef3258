//! clinical-etl CLI - sheet to record conversion and validation.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Convert {
            input,
            manifest,
            index,
            minify,
        } => commands::convert::run(input, manifest, index, minify, cli.verbose),

        Commands::Template {
            schema,
            profile,
            out,
        } => commands::template::run(schema, profile, out),

        Commands::Validate { input, manifest } => {
            commands::validate::run(input, manifest, cli.verbose)
        }

        Commands::Completeness { input } => commands::completeness::run(input),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
