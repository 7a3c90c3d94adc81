use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "callscribe",
    version,
    about = "Sales-call audio ingestion, transcription, and performance analysis"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the tenant-facing backend API and batch worker pool
    Serve,

    /// Run the transcription job service
    SttService,

    /// Provision a new tenant audio table and print its key
    InitTenant {
        /// Use an existing key instead of generating one
        #[arg(long)]
        key: Option<String>,
    },
}
