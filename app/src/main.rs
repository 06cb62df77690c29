#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod command;

use command::{
    ChatInput, ChatStrategy, CommandStrategy, InfoStrategy, InitStrategy, VersionStrategy,
};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Multi-turn chat client for the responses API", long_about = None)]
struct Cli {
    /// Log request lifecycle at info level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the model, single-shot or interactively
    Chat {
        /// Single message to send
        #[arg(short = 'm', long)]
        message: Option<String>,

        /// Print the reply as it arrives
        #[arg(short, long)]
        stream: bool,

        /// Model to use
        #[arg(short = 'M', long)]
        model: Option<String>,

        /// Extra instructions appended to the system prompt for every turn
        #[arg(short, long)]
        instructions: Option<String>,

        /// Config file to use instead of ~/parley/config.json
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Initialize configuration
    Init,
    /// Show loaded configuration
    Info {
        /// Config file to use instead of ~/parley/config.json
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Chat {
            message,
            stream,
            model,
            instructions,
            config,
        } => {
            ChatStrategy
                .execute(ChatInput {
                    message,
                    stream,
                    model,
                    instructions,
                    config_path: config,
                })
                .await
        }
        Commands::Init => InitStrategy.execute(()).await,
        Commands::Info { config } => InfoStrategy.execute(config).await,
        Commands::Version => VersionStrategy.execute(()).await,
    }
}
