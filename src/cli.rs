use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate a PO/POT or JSON catalog
    Translate {
        /// Input catalog file
        #[arg(short, long)]
        input: PathBuf,

        /// Output catalog file
        #[arg(short, long)]
        output: PathBuf,

        /// Target language code (overrides the config file)
        #[arg(short = 'l', long)]
        target_lang: Option<String>,

        /// Number of worker tasks
        #[arg(long)]
        workers: Option<usize>,

        /// Checkpoint file to resume from and append to
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Show what a checkpoint file holds
    Status {
        /// Checkpoint file
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Rewrite a checkpoint file with one line per unit
    Compact {
        /// Checkpoint file
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Write the default configuration file
    InitConfig {
        /// Destination path
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },
}
