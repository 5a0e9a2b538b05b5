use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Args;

use relog_api::registry::TypeRegistry;
use relog_convert::template;

use super::config::Config;
use super::error::CliError;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Output directory for the generated files.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Reference time (RFC 3339), e.g. "2024-01-01T00:00:00Z". Defaults to now.
    #[arg(long)]
    pub time: Option<String>,

    /// Snapshot file defining the source type.
    #[arg(long)]
    pub source_tlb: PathBuf,

    /// Fully-qualified source type name, e.g. "/base/Position".
    #[arg(long)]
    pub source_type: String,

    /// Snapshot file defining the target type.
    #[arg(long)]
    pub target_tlb: PathBuf,

    /// Fully-qualified target type name.
    #[arg(long)]
    pub target_type: String,

    /// Comment written at the top of the generated script.
    #[arg(long)]
    pub description: Option<String>,
}

pub fn run(args: &CreateArgs, config: &Config) -> Result<(), CliError> {
    let out = args
        .out
        .clone()
        .or_else(|| config.output_dir.clone().map(PathBuf::from))
        .ok_or_else(|| {
            CliError::Config("no output directory: pass --out or set output_dir in the config".into())
        })?;

    let time = match &args.time {
        Some(t) => DateTime::parse_from_rfc3339(t)
            .map_err(|e| CliError::Config(format!("bad --time '{t}': {e}")))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let source_registry = load_registry(&args.source_tlb)?;
    let target_registry = load_registry(&args.target_tlb)?;
    let source_type = source_registry.get(&args.source_type)?;
    let target_type = target_registry.get(&args.target_type)?;

    let description = args
        .description
        .clone()
        .unwrap_or_else(|| format!("Converter created at {}", Utc::now().to_rfc3339()));

    let (script, source_tlb, target_tlb) =
        template::create(&out, time, &source_type, &target_type, &description)?;

    println!("{}", script.display());
    println!("{}", source_tlb.display());
    println!("{}", target_tlb.display());
    Ok(())
}

fn load_registry(path: &Path) -> Result<TypeRegistry, CliError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))?;
    Ok(TypeRegistry::from_tlb(&content)?)
}
