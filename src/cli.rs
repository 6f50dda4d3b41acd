use clap::{Args, Parser, Subcommand};

use crate::document::Variant;
use crate::form::TextField;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Workspace directory holding the session snapshot and attachment blobs.
    #[arg(long, global = true, default_value = ".recipe-producer")]
    pub workspace: String,

    /// Log debug events from the editor (`RUST_LOG` takes precedence).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add an empty document and make it active.
    Add(AddArgs),
    /// List the documents of the current mode (`*` marks the active one).
    List,
    /// Make document `index` active.
    Switch { index: usize },
    /// Remove document `index`.
    Remove { index: usize },
    /// Show only recipe or only function documents.
    Mode { variant: Variant },
    /// Set a text field of the active document.
    Set(SetArgs),
    /// Name walkthrough step `step` of the active recipe.
    StepName { step: usize, name: String },
    /// Set the alt text of one media item of the active recipe.
    Alt(AltArgs),
    /// Import `.json` documents and `.zip` archives.
    Import(ImportArgs),
    /// Attach an image to a walkthrough step of the active recipe.
    Attach(AttachArgs),
    /// Print the active document as it will be exported.
    Preview,
    /// Write every titled document into one zip archive.
    Export(ExportArgs),
    /// Delete every document and attachment in the workspace.
    Cleanup,
}

impl Command {
    pub fn mutates(&self) -> bool {
        !matches!(self, Self::List | Self::Preview | Self::Cleanup)
    }
}

#[derive(Debug, Args)]
pub struct AddArgs {
    #[arg(long, value_enum, default_value_t = Variant::Recipe)]
    pub variant: Variant,

    /// Title for the new document.
    #[arg(long)]
    pub title: Option<String>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    #[arg(value_enum)]
    pub field: TextField,
    pub value: String,
}

#[derive(Debug, Args)]
pub struct AltArgs {
    /// Walkthrough step index.
    #[arg(long)]
    pub step: usize,

    /// Media index within the step.
    #[arg(long, default_value_t = 0)]
    pub media: usize,

    pub alt: String,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Files to import (`.zip` archives, anything else is read as JSON).
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Debug, Args)]
pub struct AttachArgs {
    /// Walkthrough step index.
    #[arg(long)]
    pub step: usize,

    /// Media index within the step (default: first empty slot, else a new one).
    #[arg(long)]
    pub media: Option<usize>,

    /// Image file (jpg, jpeg, png, gif, webp).
    #[arg(long)]
    pub file: String,

    /// Alt text; also used to name the attachment.
    #[arg(long)]
    pub alt: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Output directory for the archive.
    #[arg(long)]
    pub out: String,
}
