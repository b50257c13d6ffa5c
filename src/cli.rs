use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stillcast")]
#[command(author, version, about = "Turn a still image and an audio track into an MP4")]
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
    /// Start the upload/download web service
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Convert an image and an audio file into a video locally
    Convert {
        /// Still image (PNG, JPG, JPEG, GIF or BMP)
        image: PathBuf,

        /// Audio track (MP3, WAV, M4A, AAC or OGG)
        audio: PathBuf,

        /// Where to write the MP4
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the duration of an audio file
    Probe {
        /// File to probe
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that ffmpeg and ffprobe are available
    CheckTools {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config or defaults if not specified)
        config: Option<PathBuf>,
    },
}
