use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "atomkit")]
#[command(author, version, about = "MP4 box inspection and remuxing tool")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the tracks of an MP4 file
    Inspect {
        /// File to inspect
        #[arg(required = true)]
        file: PathBuf,

        /// Print the raw box tree instead of the track summary
        #[arg(long)]
        tree: bool,
    },

    /// Rewrite an MP4 file through the muxer
    Remux {
        /// Source file
        #[arg(required = true)]
        input: PathBuf,

        /// Destination file
        #[arg(required = true)]
        output: PathBuf,
    },
}
