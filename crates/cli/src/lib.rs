pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "steward",
    about = "Steward operator CLI",
    long_about = "Apply migrations, inspect configuration, check readiness, purge expired workflows and manage custody wallets.",
    after_help = "Examples:\n  steward doctor --json\n  steward sweep --dry-run\n  steward wallet register U024BE7LH 0x9f2c41ab --network solana"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database schema, and delivery/execution readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Purge expired workflows and cancel the drafts they were building")]
    Sweep {
        #[arg(long, help = "Report what would be purged without writing")]
        dry_run: bool,
    },
    #[command(subcommand, about = "Manage the custody wallets users need before starting workflows")]
    Wallet(WalletCommand),
}

#[derive(Debug, Subcommand)]
enum WalletCommand {
    #[command(about = "Register or replace the custody wallet for a chat user")]
    Register {
        user_id: String,
        address: String,
        #[arg(long, default_value = "solana")]
        network: String,
    },
    #[command(about = "Show the custody wallet registered for a chat user")]
    Show { user_id: String },
    #[command(about = "Remove the custody wallet registered for a chat user")]
    Remove { user_id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Sweep { dry_run } => commands::sweep::run(dry_run),
        Command::Wallet(WalletCommand::Register { user_id, address, network }) => {
            commands::wallet::register(&user_id, &address, &network)
        }
        Command::Wallet(WalletCommand::Show { user_id }) => commands::wallet::show(&user_id),
        Command::Wallet(WalletCommand::Remove { user_id }) => commands::wallet::remove(&user_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
