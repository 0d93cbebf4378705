use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ConfigCommand, NoteCommand};
use notesync::config::Config;
use notesync::db::{init_db, SqliteNoteStore};
use notesync::sync::{HttpNoteClient, OfflineRemote, RemoteClient, RemoteError, SyncCoordinator};

#[derive(Parser)]
#[command(name = "notesync")]
#[command(version)]
#[command(about = "Keep notes in sync between this machine and a note server", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Note(NoteCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notesync=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Note(cmd)) => {
            let sync = coordinator(&config).await?;
            let result = cmd.run(&sync).await;
            sync.shutdown().await;
            result?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

async fn coordinator(config: &Config) -> Result<SyncCoordinator, Box<dyn std::error::Error>> {
    let pool = init_db(&config.database_path.value).await?;
    let local = Arc::new(SqliteNoteStore::new(pool));

    let remote: Arc<dyn RemoteClient> = match HttpNoteClient::from_config(config) {
        Ok(client) => Arc::new(client),
        Err(RemoteError::NotConfigured) => {
            tracing::info!("No server_url configured, running offline");
            Arc::new(OfflineRemote)
        }
        Err(e) => return Err(e.into()),
    };

    Ok(SyncCoordinator::new(local, remote, config.poll_interval()))
}
