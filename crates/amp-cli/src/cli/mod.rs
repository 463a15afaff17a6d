//! CLI entry and dispatch.

use amp_core::core::interrupt;
use amp_core::{config, logging};
use anyhow::{Context, Result};
use clap::Parser;

mod commands;

#[derive(Parser)]
#[command(name = "amp")]
#[command(version)]
#[command(about = "Ampersand CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Log in to an Ampersand account
    Login,

    /// Log out of an Ampersand account
    Logout,

    /// Generate a JWT for HTTP requests and print it
    #[command(name = "generate-request-token", hide = true)]
    GenerateRequestToken,

    /// Run the browser sign-in handoff with a fixed identity
    Handoff(commands::handoff::HandoffArgs),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.debug);
    interrupt::init()?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = config::Config::load().context("load config")?;

    match cli.command {
        Commands::Login => commands::auth::login(&config).await,
        Commands::Logout => commands::auth::logout(&config),
        Commands::GenerateRequestToken => commands::auth::request_token(&config).await,
        Commands::Handoff(args) => commands::handoff::run(args, &config).await,
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
