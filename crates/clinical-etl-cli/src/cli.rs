//! CLI argument definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// clinical-etl: convert clinical sheets into nested, validated records
#[derive(Parser)]
#[command(name = "clinical-etl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a sheet or directory of sheets into records
    Convert {
        /// Path to a CSV/TSV file or a directory of them
        #[arg(short, long, value_name = "PATH")]
        input: PathBuf,

        /// Path to the run manifest (YAML)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Also write the indexed data with computed values
        #[arg(long)]
        index: bool,

        /// Write compact JSON
        #[arg(long)]
        minify: bool,
    },

    /// Generate a mapping template skeleton from an OpenAPI schema
    Template {
        /// URL or path of the OpenAPI document
        #[arg(short, long)]
        schema: String,

        /// Validation profile whose component is templated
        #[arg(short, long, default_value = clinical_etl::validation::DEFAULT_PROFILE)]
        profile: String,

        /// Output path without extension (writes <out>.csv)
        #[arg(short, long, default_value = "template")]
        out: PathBuf,
    },

    /// Validate the records of an existing _map.json
    Validate {
        /// Path to the _map.json file
        #[arg(short, long, value_name = "MAP")]
        input: PathBuf,

        /// Path to the run manifest (YAML)
        #[arg(short, long)]
        manifest: PathBuf,
    },

    /// Write a completeness table from the statistics in a _map.json
    Completeness {
        /// Path to the _map.json file
        #[arg(short, long, value_name = "MAP")]
        input: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_template_defaults() {
        let cli = Cli::try_parse_from(["clinical-etl", "template", "--schema", "s.yml"]).unwrap();
        match cli.command {
            Commands::Template { profile, out, .. } => {
                assert_eq!(profile, "MoHSchemaV3");
                assert_eq!(out, PathBuf::from("template"));
            }
            _ => panic!("expected template"),
        }
    }

    #[test]
    fn test_convert_flags() {
        let cli = Cli::try_parse_from([
            "clinical-etl", "convert", "-i", "data", "-m", "manifest.yml", "--index", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Convert { index: true, minify: false, .. }));
    }
}
