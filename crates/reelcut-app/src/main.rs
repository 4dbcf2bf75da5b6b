//! reelcut - export edit sessions to MP4.
//!
//! Usage:
//!   reelcut export <SESSION> -o <OUT>   Export a session file
//!   reelcut probe <FILE>                Show stream information
//!   reelcut import <FILES>... -o <OUT>  Build a session from media files
//!   reelcut presets                     List export presets
//!   reelcut config [--init]             Show or create the config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reelcut_core::logging::init_logging;
use reelcut_core::ReelcutConfig;

mod commands;

#[derive(Parser)]
#[command(name = "reelcut", about = "Video export pipeline", version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a session file to MP4
    Export {
        /// Session JSON
        session: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Preset name (SNS, STANDARD, HIGH_QUALITY)
        #[arg(long)]
        preset: Option<String>,

        /// Render on the CPU instead of the GPU
        #[arg(long)]
        software: bool,
    },

    /// Show stream information for a media file
    Probe {
        file: PathBuf,

        /// Print the raw probe as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build a session that plays the given files back to back
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Session file to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List the export presets
    Presets,

    /// Show the configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ReelcutConfig::load();
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    logging.json |= cli.json_logs;
    init_logging(&logging);

    match cli.command {
        Commands::Export {
            session,
            output,
            preset,
            software,
        } => commands::export::run(session, output, preset, software, &config),
        Commands::Probe { file, json } => commands::probe::run(file, json),
        Commands::Import { files, output } => commands::import::run(files, output),
        Commands::Presets => commands::presets::run(),
        Commands::Config { init } => commands::config::run(init, &config),
    }
}
