use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "postbox")]
#[command(about = "Serialized multipart upload client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload files one at a time, each as its own form field
    Upload(UploadArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct UploadArgs {
    /// Form identifier the uploads belong to
    #[arg(long)]
    pub form: String,

    /// Upload URL; overrides the configured endpoint for this form
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Configuration file (defaults to POSTBOX_CONFIG or config/postbox.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Files to upload, in order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file (defaults to POSTBOX_CONFIG or config/postbox.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
