pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "resourcing",
    about = "Resourcing request operator CLI",
    long_about = "Apply migrations, load demo data, inspect configuration, and check runtime readiness.",
    after_help = "Examples:\n  resourcing migrate\n  resourcing seed\n  resourcing config --config resourcing.toml\n  resourcing doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Read configuration from this file instead of resourcing.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo users and resourcing requests (idempotent)")]
    Seed {
        #[arg(long, help = "Remove the seeded resourcing requests instead of loading them")]
        clean: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Check config, notification transport, database and outbox readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(config_path),
        Command::Seed { clean } => commands::seed::run(config_path, clean),
        Command::Config => commands::config::run(config_path),
        Command::Doctor { json } => commands::doctor::run(config_path, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
