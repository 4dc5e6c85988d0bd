use std::path::PathBuf;

use clap::Parser;

use crate::Commands;

/// Main CLI application arguments and command structure
#[derive(Parser)]
#[clap(
    name = "moodnotes",
    version,
    about = "Journal and novel notes with mood insights, synced through a shared folder"
)]
pub struct Cli {
    /// Path to the configuration file
    #[clap(short = 'c', long, value_parser)]
    pub config: Option<PathBuf>,

    /// Act as this user instead of the signed-in one
    #[clap(short, long)]
    pub user: Option<String>,

    /// Verbose output mode
    #[clap(short, long)]
    pub verbose: bool,

    /// Subcommands for the moodnotes application
    #[clap(subcommand)]
    pub command: Commands,
}
