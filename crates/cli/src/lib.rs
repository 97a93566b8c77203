pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "bridgesync",
    about = "Bridgesync operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations, report entity mappings, and sign webhook payloads for the CRM/Finance bridge.",
    after_help = "Examples:\n  bridgesync doctor --json\n  bridgesync config\n  bridgesync mappings --entity-type Contact\n  bridgesync sign --system crm --file payload.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, upstream credential presence, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "List entity mappings and flag the ones due for a periodic resync")]
    Mappings {
        #[arg(long, help = "Entity type to report on, e.g. Contact")]
        entity_type: String,
        #[arg(
            long,
            requires = "system",
            help = "Resolve the mapping pointing at this counterpart id"
        )]
        counterpart: Option<String>,
        #[arg(long, help = "Restrict to one system (crm or finance)")]
        system: Option<String>,
    },
    #[command(about = "Compute the webhook signature header value for a payload file")]
    Sign {
        #[arg(long, help = "System whose webhook secret signs the payload (crm or finance)")]
        system: String,
        #[arg(long, help = "Path to the raw payload body")]
        file: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Migrate => commands::migrate::run(),
        Command::Mappings { entity_type, counterpart, system } => {
            commands::mappings::run(&entity_type, counterpart.as_deref(), system.as_deref())
        }
        Command::Sign { system, file } => commands::sign::run(&system, &file),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
