//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sentiment-ingest")]
#[command(about = "Uploads data fragments and tracks the analysis job to completion")]
#[command(version)]
pub struct Args {
    /// Files to stage and upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Backend base URL
    #[arg(long, short = 's', default_value = "http://localhost:8000")]
    pub server: String,

    /// Username for authentication
    #[arg(long, short = 'u')]
    pub username: Option<String>,

    /// Password for authentication
    #[arg(long, short = 'p')]
    pub password: Option<String>,

    /// Project the analysis job belongs to
    #[arg(long, default_value = "default")]
    pub project: String,

    /// Wall-clock budget for the job in seconds
    #[arg(long, default_value = "45")]
    pub job_timeout: u64,

    /// Show detailed progress and retry information
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Suppress all non-error output
    #[arg(long, short = 'q')]
    pub quiet: bool,
}
