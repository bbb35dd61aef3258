//! Template command - write a mapping template skeleton.

use std::fs;
use std::path::PathBuf;

use colored::Colorize;
use clinical_etl::template::generate_template;
use clinical_etl::{OpenApiSchema, Profile};

use super::CommandResult;

pub fn run(schema: String, profile: String, out: PathBuf) -> CommandResult {
    let profile = Profile::by_name(&profile).ok_or_else(|| {
        format!(
            "Unknown profile '{}'; expected one of {}",
            profile,
            Profile::names().join(", ")
        )
    })?;

    println!(
        "{} {} from {}",
        "Generating".cyan().bold(),
        profile.component.white().bold(),
        schema.white()
    );
    let openapi = OpenApiSchema::load(&schema, &profile.component)?;
    let text = generate_template(&openapi, &profile);

    let mut path = out.into_os_string();
    path.push(".csv");
    let path = PathBuf::from(path);
    fs::write(&path, text)?;

    println!(
        "{} {}",
        "Saved to".green().bold(),
        path.display().to_string().white()
    );
    Ok(true)
}
