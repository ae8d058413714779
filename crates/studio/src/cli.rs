use clap::Parser;
use std::path::PathBuf;

/// Chat with a Gemini model that answers with diagrams, quizzes, math and code files
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Send a single message and exit instead of starting the interactive chat
    #[arg(short, long)]
    pub task: Option<String>,

    /// Enable verbose logging (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Model name to use
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// API base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// API key, overrides settings and environment
    #[arg(long)]
    pub api_key: Option<String>,

    /// Settings file to use instead of ~/.config/code-studio/settings.json
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum model round trips per message
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Record API responses to a file
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Play back a recorded session from a file
    #[arg(long)]
    pub playback: Option<PathBuf>,

    /// Fast playback mode - ignore chunk timing when playing recordings
    #[arg(long)]
    pub fast_playback: bool,

    /// Write files from generated code blocks into this directory
    #[arg(long)]
    pub preview_dir: Option<PathBuf>,
}

impl Args {
    pub fn parse() -> Self {
        <Args as Parser>::parse()
    }
}
