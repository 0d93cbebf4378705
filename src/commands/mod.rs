use clap::ValueEnum;

mod config_cmd;
mod note;

pub use config_cmd::ConfigCommand;
pub use note::NoteCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
