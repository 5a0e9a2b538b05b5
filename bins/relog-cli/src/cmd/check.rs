use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde::Serialize;

use relog_convert::converter::ConverterRegistry;
use relog_convert::loader;

use super::config::Config;
use super::error::CliError;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Directory containing converter scripts and snapshot pairs.
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ConverterReport {
    name: String,
    effective_date: String,
    source_type: String,
    target_type: String,
}

pub fn run(args: &CheckArgs, config: &Config) -> Result<(), CliError> {
    let dir = args
        .dir
        .clone()
        .or_else(|| config.converters_dir.clone().map(PathBuf::from))
        .ok_or_else(|| {
            CliError::Config("no converter directory: pass --dir or set converters_dir in the config".into())
        })?;

    let registry = Arc::new(ConverterRegistry::new());
    let converters = loader::load_dir(&dir, &registry)?;

    let reports: Vec<ConverterReport> = converters
        .iter()
        .map(|c| ConverterReport {
            name: c.name().to_string(),
            effective_date: c.effective_date().to_rfc3339(),
            source_type: c.source_type().name().to_string(),
            target_type: c.target_type().name().to_string(),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!(
                "{}  {}  {} -> {}",
                report.effective_date, report.name, report.source_type, report.target_type
            );
        }
        println!("{} converter(s) loaded", reports.len());
    }
    Ok(())
}
