pub mod commands;

use clap::{Parser, Subcommand};
use skillpath_core::config::{AppConfig, LoadOptions, LogFormat};
use std::process::ExitCode;
use tracing::Level;

#[derive(Debug, Parser)]
#[command(
    name = "skillpath",
    about = "Skillpath training workflow operator CLI",
    long_about = "Operate the training workflow store: migrations, config inspection, readiness checks and audit trails.",
    after_help = "Examples:\n  skillpath doctor --json\n  skillpath config\n  skillpath audit TR-2026-00001"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, schema state and approver coverage")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List the audit trail of an entity in chronological order")]
    Audit {
        #[arg(help = "Request number, or a request, approval, session or enrollment id")]
        id: String,
        #[arg(long, help = "Treat the id as a correlation id and list every entry it wrote")]
        correlation: bool,
    },
}

/// Falls back to `info` on an unparsable level; config validation already
/// rejects those before this runs.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(log_level);

    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| anyhow::anyhow!("failed to install tracing subscriber: {error}"))
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Config errors are reported by the command itself.
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        if let Err(error) = init_logging(&config) {
            eprintln!("{error:#}");
        }
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Audit { id, correlation } => commands::audit::run(&id, correlation),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
