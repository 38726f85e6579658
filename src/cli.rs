use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reframe")]
#[command(author, version, about = "Reframe media uploads into per-platform formats")]
pub struct Cli {
    /// Path to config file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset, e.g. "debug" or "rf_jobs=trace"
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Process a single file locally and print the finished job
    Process {
        /// Input image or video
        #[arg(required = true)]
        input: PathBuf,

        /// Format to produce as platform:Name, repeatable
        #[arg(short, long = "format", required = true)]
        formats: Vec<String>,

        /// Directory artifacts are written under (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output encoding: auto, jpeg, png, webp, avif
        #[arg(long, default_value = "auto")]
        output_format: String,

        /// Ask the optimizer for lossless output
        #[arg(long)]
        lossless: bool,

        /// Fit mode: cover or contain
        #[arg(long, default_value = "cover")]
        fit: String,

        /// Video quality: high, medium, low
        #[arg(long, default_value = "medium")]
        video_quality: String,
    },

    /// List the format catalog
    Formats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that external tools are available
    Check,

    /// Print the effective configuration and any warnings
    Config,
}
