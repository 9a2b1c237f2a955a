use clap::Parser;
use std::path::PathBuf;

use crate::config::WhisperModel;

/// Transcribe, translate and subtitle video files in batch.
#[derive(Parser, Debug)]
#[command(name = "videotool", author, version, about, long_about = None)]
pub struct Args {
    /// Input video file or directory containing videos
    pub input: PathBuf,

    /// Source language of the audio
    #[arg(short, long, default_value = "en")]
    pub source: String,

    /// Target languages for translation (none = transcribe only)
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Whisper model size (defaults to the config file value)
    #[arg(short, long, value_enum)]
    pub model: Option<WhisperModel>,

    /// Use the local ollama backend instead of the Claude API
    #[arg(long)]
    pub local: bool,

    /// Output directory (default: next to each input file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Process subdirectories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Skip work the ledger reports as already done (default)
    #[arg(long, overrides_with = "no_skip_existing")]
    pub skip_existing: bool,

    /// Process everything, overwriting existing outputs
    #[arg(long, overrides_with = "skip_existing")]
    pub no_skip_existing: bool,

    /// Anthropic API key (falls back to ANTHROPIC_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Number of videos processed concurrently
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Attempts per stage before giving up on transient errors
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Per-attempt timeout for a single stage, in seconds
    #[arg(long)]
    pub stage_timeout: Option<u64>,

    /// Stop launching new videos after the first failure
    #[arg(long)]
    pub stop_on_error: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn skip_existing(&self) -> bool {
        !self.no_skip_existing
    }
}
