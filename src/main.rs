use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Args, Commands};
use commands::utils::{init_logging, open_service};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let command = match args.command {
        Commands::Init { output, force } => return commands::init::init(output, force),
        command => command,
    };

    let service = open_service(args.config.as_deref(), args.state)?;

    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Account { command } => commands::accounts::account(&service, command).await,
        Commands::Maturity { command } => commands::accounts::maturity(&service, command).await,
        Commands::Code { command } => commands::credentials::code(&service, command).await,
        Commands::Password { command } => commands::credentials::password(&service, command).await,
        Commands::Panic { kid, message } => commands::safety::panic(&service, kid, message).await,
        Commands::Events { command } => commands::safety::events(&service, command).await,
        Commands::Approvals { command } => commands::safety::approvals(&service, command).await,
        Commands::Access { command } => commands::safety::access(&service, command).await,
    }
}
