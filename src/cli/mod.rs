use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "media-gateway",
    about = "Media Gateway - Inspect and stream media from YouTube, Facebook, Instagram and TikTok",
    version,
    long_about = "An HTTP gateway that lists the encodings available for a media URL and streams a browser-ready mp4 of the chosen one. Extraction and transcoding are delegated to yt-dlp and ffmpeg."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "MEDIA_GATEWAY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(short, long, env = "MEDIA_GATEWAY_BIND", value_name = "ADDR")]
        bind: Option<String>,
    },

    /// List the encodings available for a URL
    Analyze {
        /// Media URL to inspect
        #[arg(value_name = "URL")]
        url: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the transcoder command a stream request would run
    Plan {
        /// Media URL to stream
        #[arg(value_name = "URL")]
        url: String,

        /// Encoding to stream, as listed by `analyze`
        #[arg(short = 'i', long, default_value = "best")]
        format_id: String,
    },

    /// Show or create the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write the default configuration file
        #[arg(long, conflicts_with = "show")]
        init: bool,
    },

    /// List supported platforms
    Platforms,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum OutputFormat {
    /// Plain text table
    Text,
    /// JSON, as returned by POST /analyze
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
