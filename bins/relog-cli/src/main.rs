mod cmd;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relog", about = "Schema-evolution tooling for recorded typed samples")]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(long, default_value = "relog.toml", env = "RELOG_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scaffold a converter script with paired schema snapshots.
    CreateConverter(cmd::create::CreateArgs),
    /// Load a converter directory and report what it defines.
    CheckConverters(cmd::check::CheckArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match cmd::config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::CreateConverter(args) => cmd::create::run(&args, &config),
        Command::CheckConverters(args) => cmd::check::run(&args, &config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
