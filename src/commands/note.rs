use clap::Subcommand;

use notesync::models::Note;
use notesync::sync::{StoreError, SyncCoordinator};

use super::OutputFormat;

#[derive(Subcommand)]
pub enum NoteCommand {
    /// Show a note from the local store
    Show {
        /// Note title
        title: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List all local notes
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Save a note locally and push it to the server
    Put {
        /// Note title
        title: String,

        /// New content
        content: String,

        /// Save locally only, without pushing
        #[arg(long)]
        local: bool,
    },

    /// Delete a note from the local store
    Delete {
        /// Note title
        title: String,
    },

    /// Follow a note, printing every newer version until interrupted
    Watch {
        /// Note title
        title: String,
    },
}

impl NoteCommand {
    pub async fn run(&self, sync: &SyncCoordinator) -> Result<(), CommandError> {
        match self {
            NoteCommand::Show { title, format } => {
                let note = sync
                    .get_local(title)
                    .await?
                    .borrow()
                    .clone()
                    .ok_or_else(|| CommandError::NotFound(title.clone()))?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&note)?),
                    OutputFormat::Text => print!("{}", note),
                }
            }
            NoteCommand::List { format } => {
                let notes = sync.get_all_local().await?.borrow().clone();
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&notes)?),
                    OutputFormat::Text => {
                        if notes.is_empty() {
                            println!("No notes found.");
                        }
                        for note in &notes {
                            println!("{} (v{})", note.title, note.version);
                        }
                    }
                }
            }
            NoteCommand::Put {
                title,
                content,
                local,
            } => {
                let note = Note::new(title.clone(), content.clone());
                let stored = if *local {
                    sync.upsert_local(&note).await?
                } else {
                    sync.upsert_synced(&note).await?
                };
                println!("Saved '{}' at version {}", stored.title, stored.version);
            }
            NoteCommand::Delete { title } => {
                let note = sync
                    .get_local(title)
                    .await?
                    .borrow()
                    .clone()
                    .ok_or_else(|| CommandError::NotFound(title.clone()))?;
                sync.delete_local(&note).await?;
                println!("Deleted '{}'", title);
            }
            NoteCommand::Watch { title } => watch(sync, title).await?,
        }

        Ok(())
    }
}

async fn watch(sync: &SyncCoordinator, title: &str) -> Result<(), CommandError> {
    let mut view = sync.get_synced(title).await?;
    print_version(title, view.current());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = view.changed() => match changed {
                Ok(note) => print_version(title, note),
                Err(_) => break,
            },
        }
    }

    Ok(())
}

fn print_version(title: &str, note: Option<Note>) {
    match note {
        Some(note) => println!("[v{}] {}", note.version, note.content),
        None => println!("'{}' does not exist yet", title),
    }
}

/// Errors from note commands
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("Note not found: {0}")]
    NotFound(String),
    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
}
